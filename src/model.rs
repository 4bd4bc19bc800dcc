use anyhow::{bail, Result};
use ndarray::{Array2, Array3};

use crate::layout::BlockLayout;

/// Covariate-dependent mixture HMM over multichannel discrete observations.
///
/// States are partitioned into contiguous blocks; transitions are confined to
/// a block, and each block carries its own slice of the initial distribution.
/// Emission rows live in an (states, max_symbols, channels) cube where channel
/// `r` only uses the first `n_symbols[r]` columns.
#[derive(Debug, Clone)]
pub struct MixtureHmm {
    pub layout: BlockLayout,
    pub transition: Array2<f64>,
    pub emission: Array3<f64>,
    pub init: Vec<f64>,
    pub trans_mask: Array2<bool>,
    pub emiss_mask: Array3<bool>,
    pub init_mask: Vec<bool>,
    pub n_symbols: Vec<usize>,
}

impl MixtureHmm {
    pub fn new(
        block_sizes: &[usize],
        transition: Array2<f64>,
        emission: Array3<f64>,
        init: Vec<f64>,
        trans_mask: Array2<bool>,
        emiss_mask: Array3<bool>,
        init_mask: Vec<bool>,
        n_symbols: Vec<usize>,
    ) -> Result<Self> {
        let layout = BlockLayout::new(block_sizes)?;
        let n_states = layout.n_states();
        let (em_states, max_symbols, n_channels) = emission.dim();

        if transition.nrows() != n_states || transition.ncols() != n_states {
            bail!(
                "transition matrix is {}x{}, expected {n_states}x{n_states}",
                transition.nrows(),
                transition.ncols()
            );
        }
        if em_states != n_states {
            bail!("emission cube has {em_states} states, expected {n_states}");
        }
        if max_symbols < 2 {
            bail!("emission cube needs at least two symbol columns");
        }
        if init.len() != n_states {
            bail!(
                "initial distribution has length {}, expected {n_states}",
                init.len()
            );
        }
        if n_symbols.len() != n_channels {
            bail!(
                "n_symbols has length {}, but emission cube has {n_channels} channels",
                n_symbols.len()
            );
        }
        for (r, &ns) in n_symbols.iter().enumerate() {
            if ns < 1 || ns > max_symbols {
                bail!("channel {r} alphabet size {ns} outside 1..={max_symbols}");
            }
        }
        if trans_mask.dim() != transition.dim() {
            bail!("transition mask shape does not match transition matrix");
        }
        if emiss_mask.dim() != (n_states, max_symbols - 1, n_channels) {
            bail!(
                "emission mask is {:?}, expected ({n_states}, {}, {n_channels})",
                emiss_mask.dim(),
                max_symbols - 1
            );
        }
        if init_mask.len() != n_states {
            bail!(
                "initial mask has length {}, expected {n_states}",
                init_mask.len()
            );
        }
        for i in 0..n_states {
            for j in 0..n_states {
                if trans_mask[(i, j)] && layout.block_of(i) != layout.block_of(j) {
                    bail!("transition mask marks cross-block entry ({i}, {j}) as free");
                }
            }
        }
        for r in 0..n_channels {
            for i in 0..n_states {
                for v in 0..(max_symbols - 1) {
                    if emiss_mask[(i, v, r)] && v >= n_symbols[r] {
                        bail!(
                            "emission mask marks symbol {v} of channel {r} as free, \
                             but the channel alphabet has {} symbols",
                            n_symbols[r]
                        );
                    }
                }
            }
        }

        Ok(Self {
            layout,
            transition,
            emission,
            init,
            trans_mask,
            emiss_mask,
            init_mask,
            n_symbols,
        })
    }

    pub fn n_states(&self) -> usize {
        self.layout.n_states()
    }

    pub fn n_channels(&self) -> usize {
        self.n_symbols.len()
    }

    /// Free entries across the three parameter masks.
    pub fn n_free_params(&self) -> usize {
        let a = self.trans_mask.iter().filter(|&&m| m).count();
        let b = self.emiss_mask.iter().filter(|&&m| m).count();
        let i = self.init_mask.iter().filter(|&&m| m).count();
        a + b + i
    }

    /// Total gradient length for `q` covariate columns, including the
    /// mixture-coefficient segment for the non-reference blocks.
    pub fn grad_len(&self, q: usize) -> usize {
        self.n_free_params() + (self.layout.n_blocks() - 1) * q
    }

    /// Probability of the full multichannel symbol at (subject, step) in
    /// `state`: product over channels.
    pub fn symbol_prob(&self, state: usize, obs: &Array3<usize>, subject: usize, t: usize) -> f64 {
        let mut p = 1.0;
        for r in 0..self.n_channels() {
            p *= self.emission[(state, obs[(subject, t, r)], r)];
        }
        p
    }

    /// Same product with one channel left out, for that channel's own
    /// gradient row.
    pub fn symbol_prob_excluding(
        &self,
        state: usize,
        obs: &Array3<usize>,
        subject: usize,
        t: usize,
        skip: usize,
    ) -> f64 {
        let mut p = 1.0;
        for r in 0..self.n_channels() {
            if r != skip {
                p *= self.emission[(state, obs[(subject, t, r)], r)];
            }
        }
        p
    }
}

use anyhow::{bail, Result};
use std::ops::Range;

/// Partition of the full state space into contiguous mixture blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    sizes: Vec<usize>,
    offsets: Vec<usize>,
}

impl BlockLayout {
    pub fn new(sizes: &[usize]) -> Result<Self> {
        if sizes.is_empty() {
            bail!("block layout needs at least one block");
        }
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut total = 0usize;
        offsets.push(0);
        for (j, &s) in sizes.iter().enumerate() {
            if s == 0 {
                bail!("block {j} has zero states");
            }
            total += s;
            offsets.push(total);
        }
        Ok(Self {
            sizes: sizes.to_vec(),
            offsets,
        })
    }

    pub fn n_states(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    pub fn n_blocks(&self) -> usize {
        self.sizes.len()
    }

    pub fn block_size(&self, block: usize) -> usize {
        self.sizes[block]
    }

    pub fn state_range(&self, block: usize) -> Range<usize> {
        self.offsets[block]..self.offsets[block + 1]
    }

    pub fn block_of(&self, state: usize) -> usize {
        debug_assert!(state < self.n_states());
        let mut block = 0;
        while self.offsets[block + 1] <= state {
            block += 1;
        }
        block
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }
}

use anyhow::{bail, Context, Result};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::model::MixtureHmm;

/// On-disk model description. Matrices are stored row-major: `transition` as
/// M×M, `emission` as (state, symbol, channel), masks likewise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub block_sizes: Vec<usize>,
    pub n_symbols: Vec<usize>,
    pub max_symbols: usize,
    pub transition: Vec<f64>,
    pub emission: Vec<f64>,
    pub initial: Vec<f64>,
    pub transition_mask: Vec<bool>,
    pub emission_mask: Vec<bool>,
    pub initial_mask: Vec<bool>,
}

impl ModelFile {
    pub fn from_model(model: &MixtureHmm) -> Self {
        Self {
            block_sizes: model.layout.sizes().to_vec(),
            n_symbols: model.n_symbols.clone(),
            max_symbols: model.emission.dim().1,
            transition: model.transition.iter().copied().collect(),
            emission: model.emission.iter().copied().collect(),
            initial: model.init.clone(),
            transition_mask: model.trans_mask.iter().copied().collect(),
            emission_mask: model.emiss_mask.iter().copied().collect(),
            initial_mask: model.init_mask.clone(),
        }
    }

    pub fn into_model(self) -> Result<MixtureHmm> {
        let n_states: usize = self.block_sizes.iter().sum();
        let n_channels = self.n_symbols.len();
        let p = self.max_symbols;
        if p < 2 {
            bail!("model file declares max_symbols={p}, need at least 2");
        }
        let transition = Array2::from_shape_vec((n_states, n_states), self.transition)
            .context("transition length does not match declared states")?;
        let emission = Array3::from_shape_vec((n_states, p, n_channels), self.emission)
            .context("emission length does not match declared shape")?;
        let trans_mask = Array2::from_shape_vec((n_states, n_states), self.transition_mask)
            .context("transition mask length does not match declared states")?;
        let emiss_mask = Array3::from_shape_vec((n_states, p - 1, n_channels), self.emission_mask)
            .context("emission mask length does not match declared shape")?;
        MixtureHmm::new(
            &self.block_sizes,
            transition,
            emission,
            self.initial,
            trans_mask,
            emiss_mask,
            self.initial_mask,
            self.n_symbols,
        )
    }
}

pub fn save_model(path: &Path, model: &MixtureHmm) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &ModelFile::from_model(model))
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_model(path: &Path) -> Result<MixtureHmm> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let spec: ModelFile =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    spec.into_model()
}

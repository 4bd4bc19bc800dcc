use anyhow::{bail, Result};
use ndarray::{Array2, Array3};

use crate::gradient::{assemble_gradient, GradientContext};
use crate::hmm::forward_backward;
use crate::mixture::{mixture_weights, subject_initials};
use crate::model::MixtureHmm;

/// Objective value and flattened gradient handed back to the optimizer.
///
/// `gradient` has length |transition mask| + |emission mask| + |initial mask|
/// + (J−1)·q, in that segment order. The layout is a contract with the
/// optimizer and never changes for a given model.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveResult {
    pub objective: f64,
    pub gradient: Vec<f64>,
}

/// Negative log-likelihood of the mixture HMM over all subjects, with its
/// analytic gradient.
///
/// `obs` is (subjects, steps, channels) of 0-indexed symbols, `covariates` is
/// (subjects, q), `coefs` is (q, blocks) with column 0 the reference block
/// (treated as zero regardless of input). Shape errors fail fast; overflow in
/// the mixture-weight softmax returns the sentinel pair (`f64::MAX`,
/// all `-f64::MAX`) instead of an error.
pub fn objective(
    model: &MixtureHmm,
    obs: &Array3<usize>,
    covariates: &Array2<f64>,
    coefs: &Array2<f64>,
) -> Result<ObjectiveResult> {
    let (n_subjects, n_steps, n_channels) = obs.dim();
    let (x_rows, q) = covariates.dim();
    validate_data(model, obs)?;
    if n_subjects == 0 || n_steps == 0 {
        bail!("observation cube is empty ({n_subjects} subjects, {n_steps} steps)");
    }
    if n_channels != model.n_channels() {
        bail!(
            "observation cube has {n_channels} channels, model has {}",
            model.n_channels()
        );
    }
    if x_rows != n_subjects {
        bail!("covariate matrix has {x_rows} rows, expected {n_subjects}");
    }
    if coefs.dim() != (q, model.layout.n_blocks()) {
        bail!(
            "coefficient matrix is {:?}, expected ({q}, {})",
            coefs.dim(),
            model.layout.n_blocks()
        );
    }

    // Reference block: column 0 is fixed at zero, not estimated.
    let mut coefs = coefs.clone();
    coefs.column_mut(0).fill(0.0);

    let weights = match mixture_weights(covariates, &coefs) {
        Some(w) => w,
        None => {
            return Ok(ObjectiveResult {
                objective: f64::MAX,
                gradient: vec![-f64::MAX; model.grad_len(q)],
            });
        }
    };

    let initk = subject_initials(model, &weights);
    let fb = forward_backward(model, &initk, obs);
    let total_loglike: f64 = fb.loglike.iter().sum();

    let ctx = GradientContext {
        model,
        obs,
        covariates,
        weights: &weights,
        initk: &initk,
        alpha: &fb.alpha,
        beta: &fb.beta,
        scales: &fb.scales,
    };
    let gradient = assemble_gradient(&ctx);

    Ok(ObjectiveResult {
        objective: -total_loglike,
        gradient,
    })
}

fn validate_data(model: &MixtureHmm, obs: &Array3<usize>) -> Result<()> {
    let (n_subjects, n_steps, n_channels) = obs.dim();
    if n_channels != model.n_channels() {
        return Ok(()); // reported with a better message by the caller
    }
    for r in 0..n_channels {
        let n_sym = model.n_symbols[r];
        for k in 0..n_subjects {
            for t in 0..n_steps {
                let v = obs[(k, t, r)];
                if v >= n_sym {
                    bail!(
                        "subject {k} step {t} channel {r}: symbol {v} outside alphabet 0..{n_sym}"
                    );
                }
            }
        }
    }
    Ok(())
}

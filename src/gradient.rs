use ndarray::{Array2, Array3};

use crate::model::MixtureHmm;

/// Everything the four gradient sub-assemblers read: the model, the data, the
/// mixture stage outputs and the forward-backward arrays of the current call.
pub struct GradientContext<'a> {
    pub model: &'a MixtureHmm,
    pub obs: &'a Array3<usize>,
    pub covariates: &'a Array2<f64>,
    pub weights: &'a Array2<f64>,
    pub initk: &'a Array2<f64>,
    pub alpha: &'a Array3<f64>,
    pub beta: &'a Array3<f64>,
    pub scales: &'a Array2<f64>,
}

/// Apply the simplex-constraint Jacobian `diag(p) − p·pᵗ` of a probability
/// row to a raw gradient: out[i] = p[i] · (raw[i] − p·raw).
pub fn simplex_jacobian(p: &[f64], raw: &[f64]) -> Vec<f64> {
    debug_assert_eq!(p.len(), raw.len());
    let dot: f64 = p.iter().zip(raw.iter()).map(|(a, b)| a * b).sum();
    p.iter()
        .zip(raw.iter())
        .map(|(&pi, &ri)| pi * (ri - dot))
        .collect()
}

/// Assemble the flattened gradient of the negative log-likelihood in the
/// fixed segment order [transition | emission | initial | mixture-coefficients].
/// The sub-assemblers accumulate log-likelihood derivatives; the final
/// negation matches the sign of the objective.
pub fn assemble_gradient(ctx: &GradientContext) -> Vec<f64> {
    let q = ctx.covariates.ncols();
    let mut grad = Vec::with_capacity(ctx.model.grad_len(q));
    transition_gradient(ctx, &mut grad);
    emission_gradient(ctx, &mut grad);
    initial_gradient(ctx, &mut grad);
    mixture_gradient(ctx, &mut grad);
    for g in grad.iter_mut() {
        *g = -*g;
    }
    grad
}

fn transition_gradient(ctx: &GradientContext, grad: &mut Vec<f64>) {
    let model = ctx.model;
    let (n_subjects, n_steps, _) = ctx.obs.dim();
    for block in 0..model.layout.n_blocks() {
        let range = model.layout.state_range(block);
        let size = range.len();
        for i in 0..size {
            let src = range.start + i;
            let mask: Vec<bool> = (0..size)
                .map(|j| model.trans_mask[(src, range.start + j)])
                .collect();
            if !mask.iter().any(|&m| m) {
                continue;
            }
            let mut raw = vec![0.0; size];
            for k in 0..n_subjects {
                for t in 0..n_steps.saturating_sub(1) {
                    let a_src = ctx.alpha[(src, t, k)];
                    let inv_norm = 1.0 / ctx.scales[(t + 1, k)];
                    for j in 0..size {
                        let dst = range.start + j;
                        raw[j] += a_src
                            * model.symbol_prob(dst, ctx.obs, k, t + 1)
                            * ctx.beta[(dst, t + 1, k)]
                            * inv_norm;
                    }
                }
            }
            let row: Vec<f64> = (0..size)
                .map(|j| model.transition[(src, range.start + j)])
                .collect();
            let applied = simplex_jacobian(&row, &raw);
            for j in 0..size {
                if mask[j] {
                    grad.push(applied[j]);
                }
            }
        }
    }
}

fn emission_gradient(ctx: &GradientContext, grad: &mut Vec<f64>) {
    let model = ctx.model;
    let n_states = model.n_states();
    let (n_subjects, n_steps, _) = ctx.obs.dim();
    let mask_cols = model.emission.dim().1 - 1;
    for r in 0..model.n_channels() {
        let n_sym = model.n_symbols[r];
        for i in 0..n_states {
            let mask: Vec<bool> = (0..mask_cols).map(|v| model.emiss_mask[(i, v, r)]).collect();
            if !mask.iter().any(|&m| m) {
                continue;
            }
            let mut raw = vec![0.0; n_sym];
            for k in 0..n_subjects {
                let v0 = ctx.obs[(k, 0, r)];
                raw[v0] += ctx.initk[(i, k)]
                    * model.symbol_prob_excluding(i, ctx.obs, k, 0, r)
                    * ctx.beta[(i, 0, k)]
                    / ctx.scales[(0, k)];
                for t in 0..n_steps.saturating_sub(1) {
                    let v = ctx.obs[(k, t + 1, r)];
                    let mut into_i = 0.0;
                    for s in 0..n_states {
                        into_i += ctx.alpha[(s, t, k)] * model.transition[(s, i)];
                    }
                    raw[v] += into_i
                        * model.symbol_prob_excluding(i, ctx.obs, k, t + 1, r)
                        * ctx.beta[(i, t + 1, k)]
                        / ctx.scales[(t + 1, k)];
                }
            }
            let row: Vec<f64> = (0..n_sym).map(|v| model.emission[(i, v, r)]).collect();
            let applied = simplex_jacobian(&row, &raw);
            for v in 0..mask_cols {
                if mask[v] {
                    grad.push(applied[v]);
                }
            }
        }
    }
}

fn initial_gradient(ctx: &GradientContext, grad: &mut Vec<f64>) {
    let model = ctx.model;
    let n_subjects = ctx.obs.dim().0;
    for block in 0..model.layout.n_blocks() {
        let range = model.layout.state_range(block);
        let size = range.len();
        let mask: Vec<bool> = range.clone().map(|s| model.init_mask[s]).collect();
        if !mask.iter().any(|&m| m) {
            continue;
        }
        let mut raw = vec![0.0; size];
        for j in 0..size {
            let s = range.start + j;
            for k in 0..n_subjects {
                raw[j] += model.symbol_prob(s, ctx.obs, k, 0) * ctx.beta[(s, 0, k)]
                    / ctx.scales[(0, k)]
                    * ctx.weights[(k, block)];
            }
        }
        let row: Vec<f64> = range.clone().map(|s| model.init[s]).collect();
        let applied = simplex_jacobian(&row, &raw);
        for j in 0..size {
            if mask[j] {
                grad.push(applied[j]);
            }
        }
    }
}

/// Multinomial-logit gradient of the mixture coefficients. Block 0 is the
/// fixed reference, so only blocks 1..J contribute, q entries each.
fn mixture_gradient(ctx: &GradientContext, grad: &mut Vec<f64>) {
    let model = ctx.model;
    let n_states = model.n_states();
    let (n_subjects, _, _) = ctx.obs.dim();
    let q = ctx.covariates.ncols();
    let n_blocks = model.layout.n_blocks();
    let base = grad.len();
    grad.resize(base + (n_blocks - 1) * q, 0.0);
    for block in 1..n_blocks {
        let seg = base + (block - 1) * q;
        for k in 0..n_subjects {
            let w = ctx.weights[(k, block)];
            for s in 0..n_states {
                let term = model.symbol_prob(s, ctx.obs, k, 0) * ctx.beta[(s, 0, k)]
                    / ctx.scales[(0, k)]
                    * ctx.initk[(s, k)];
                let factor = if model.layout.block_of(s) == block {
                    term * (1.0 - w)
                } else {
                    -term * w
                };
                for c in 0..q {
                    grad[seg + c] += factor * ctx.covariates[(k, c)];
                }
            }
        }
    }
}

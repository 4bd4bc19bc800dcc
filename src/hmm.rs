use ndarray::{Array2, Array3};

use crate::model::MixtureHmm;

/// Scaled forward/backward arrays for one objective evaluation.
///
/// `alpha[(i, t, k)]` is the forward probability of state `i` at step `t` for
/// subject `k`, normalized so states sum to one at every (t, k); the removed
/// normalization lives in `scales[(t, k)]`. `beta` is scaled consistently:
/// beta(·, N−1) = 1 and beta(·, t) = A · (b(o_{t+1}) ∘ beta(·, t+1)) / c_{t+1},
/// so that sum_i alpha(i, t) · beta(i, t) = 1 at every step.
#[derive(Debug)]
pub struct ForwardBackward {
    pub alpha: Array3<f64>,
    pub beta: Array3<f64>,
    pub scales: Array2<f64>,
    pub loglike: Vec<f64>,
}

pub fn forward_backward(
    model: &MixtureHmm,
    initk: &Array2<f64>,
    obs: &Array3<usize>,
) -> ForwardBackward {
    let (alpha, scales) = forward(model, initk, obs);
    let beta = backward(model, obs, &scales);
    let (n_subjects, n_steps, _) = obs.dim();
    let mut loglike = vec![0.0; n_subjects];
    for k in 0..n_subjects {
        for t in 0..n_steps {
            loglike[k] += scales[(t, k)].ln();
        }
    }
    ForwardBackward {
        alpha,
        beta,
        scales,
        loglike,
    }
}

pub fn forward(
    model: &MixtureHmm,
    initk: &Array2<f64>,
    obs: &Array3<usize>,
) -> (Array3<f64>, Array2<f64>) {
    let n_states = model.n_states();
    let (n_subjects, n_steps, _) = obs.dim();
    let mut alpha = Array3::zeros((n_states, n_steps, n_subjects));
    let mut scales = Array2::zeros((n_steps, n_subjects));
    let mut tmp = vec![0.0f64; n_states];

    for k in 0..n_subjects {
        let mut norm = 0.0;
        for i in 0..n_states {
            let v = initk[(i, k)] * model.symbol_prob(i, obs, k, 0);
            tmp[i] = v;
            norm += v;
        }
        scales[(0, k)] = norm;
        for i in 0..n_states {
            alpha[(i, 0, k)] = tmp[i] / norm;
        }

        for t in 1..n_steps {
            let mut norm = 0.0;
            for j in 0..n_states {
                let mut dot = 0.0;
                for i in 0..n_states {
                    dot += alpha[(i, t - 1, k)] * model.transition[(i, j)];
                }
                let v = dot * model.symbol_prob(j, obs, k, t);
                tmp[j] = v;
                norm += v;
            }
            scales[(t, k)] = norm;
            for j in 0..n_states {
                alpha[(j, t, k)] = tmp[j] / norm;
            }
        }
    }
    (alpha, scales)
}

pub fn backward(model: &MixtureHmm, obs: &Array3<usize>, scales: &Array2<f64>) -> Array3<f64> {
    let n_states = model.n_states();
    let (n_subjects, n_steps, _) = obs.dim();
    let mut beta = Array3::zeros((n_states, n_steps, n_subjects));
    let mut emit_beta = vec![0.0f64; n_states];

    for k in 0..n_subjects {
        for i in 0..n_states {
            beta[(i, n_steps - 1, k)] = 1.0;
        }
        for t_rev in 1..n_steps {
            let t = n_steps - 1 - t_rev;
            let inv_norm = 1.0 / scales[(t + 1, k)];
            for j in 0..n_states {
                emit_beta[j] = model.symbol_prob(j, obs, k, t + 1) * beta[(j, t + 1, k)] * inv_norm;
            }
            for i in 0..n_states {
                let mut acc = 0.0;
                for j in 0..n_states {
                    acc += model.transition[(i, j)] * emit_beta[j];
                }
                beta[(i, t, k)] = acc;
            }
        }
    }
    beta
}

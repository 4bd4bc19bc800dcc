use ndarray::Array2;

use crate::model::MixtureHmm;

/// Per-subject mixture weights: softmax over blocks of the linear predictor
/// X·coef. Column 0 of `coef` is the reference block and must already be zero.
///
/// Returns `None` when any exponentiated predictor overflows; the caller turns
/// that into the sentinel objective instead of an error so the optimizer's
/// line search sees an ordinary, maximally bad point.
pub fn mixture_weights(x: &Array2<f64>, coef: &Array2<f64>) -> Option<Array2<f64>> {
    let (n_subjects, q) = x.dim();
    let n_blocks = coef.ncols();
    let mut weights = Array2::zeros((n_subjects, n_blocks));
    for k in 0..n_subjects {
        let mut row_sum = 0.0;
        for j in 0..n_blocks {
            let mut lin = 0.0;
            for c in 0..q {
                lin += x[(k, c)] * coef[(c, j)];
            }
            let e = lin.exp();
            if !e.is_finite() {
                return None;
            }
            weights[(k, j)] = e;
            row_sum += e;
        }
        for j in 0..n_blocks {
            weights[(k, j)] /= row_sum;
        }
    }
    Some(weights)
}

/// Full-state initial vector per subject: the block-wise initial distribution
/// scaled by that subject's mixture weight for each block. Columns are
/// convex combinations over the block candidates and sum to one.
pub fn subject_initials(model: &MixtureHmm, weights: &Array2<f64>) -> Array2<f64> {
    let n_states = model.n_states();
    let n_subjects = weights.nrows();
    let mut initk = Array2::zeros((n_states, n_subjects));
    for k in 0..n_subjects {
        for block in 0..model.layout.n_blocks() {
            let w = weights[(k, block)];
            for s in model.layout.state_range(block) {
                initk[(s, k)] = model.init[s] * w;
            }
        }
    }
    initk
}

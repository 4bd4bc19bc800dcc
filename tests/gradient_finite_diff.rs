use ndarray::{Array2, Array3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mixhmm::{objective, MixtureHmm};

const BLOCKS: [usize; 2] = [2, 2];
const N_STATES: usize = 4;
const N_SYMBOLS: [usize; 2] = [3, 2];
const MAX_SYMBOLS: usize = 3;
const N_SUBJECTS: usize = 3;
const N_STEPS: usize = 5;
const Q: usize = 2;
const EPS: f64 = 1e-5;

struct Fixture {
    transition: Array2<f64>,
    emission: Array3<f64>,
    init: Vec<f64>,
    coefs: Array2<f64>,
    obs: Array3<usize>,
    x: Array2<f64>,
}

fn fixture() -> Fixture {
    let mut transition = Array2::zeros((N_STATES, N_STATES));
    let rows = [
        [0.8, 0.2],
        [0.3, 0.7],
        [0.55, 0.45],
        [0.25, 0.75],
    ];
    for (s, row) in rows.iter().enumerate() {
        let off = if s < 2 { 0 } else { 2 };
        transition[(s, off)] = row[0];
        transition[(s, off + 1)] = row[1];
    }

    let mut emission = Array3::zeros((N_STATES, MAX_SYMBOLS, 2));
    let ch0 = [
        [0.6, 0.3, 0.1],
        [0.2, 0.5, 0.3],
        [0.1, 0.2, 0.7],
        [0.45, 0.35, 0.2],
    ];
    let ch1 = [[0.7, 0.3], [0.4, 0.6], [0.8, 0.2], [0.15, 0.85]];
    for s in 0..N_STATES {
        for v in 0..3 {
            emission[(s, v, 0)] = ch0[s][v];
        }
        for v in 0..2 {
            emission[(s, v, 1)] = ch1[s][v];
        }
    }

    let init = vec![0.65, 0.35, 0.3, 0.7];
    let coefs =
        Array2::from_shape_vec((Q, 2), vec![0.0, 0.4, 0.0, -0.3]).unwrap();

    let mut rng = SmallRng::seed_from_u64(42);
    let mut obs = Array3::zeros((N_SUBJECTS, N_STEPS, 2));
    for k in 0..N_SUBJECTS {
        for t in 0..N_STEPS {
            for r in 0..2 {
                obs[(k, t, r)] = rng.gen_range(0..N_SYMBOLS[r]);
            }
        }
    }
    let mut x = Array2::zeros((N_SUBJECTS, Q));
    for k in 0..N_SUBJECTS {
        x[(k, 0)] = 1.0; // intercept
        x[(k, 1)] = rng.gen_range(-1.0..1.0);
    }

    Fixture {
        transition,
        emission,
        init,
        coefs,
        obs,
        x,
    }
}

fn build_model(transition: &Array2<f64>, emission: &Array3<f64>, init: &[f64]) -> MixtureHmm {
    let mut trans_mask = Array2::from_elem((N_STATES, N_STATES), false);
    for s in 0..N_STATES {
        let off = if s < 2 { 0 } else { 2 };
        trans_mask[(s, off)] = true;
        trans_mask[(s, off + 1)] = true;
    }
    let mut emiss_mask = Array3::from_elem((N_STATES, MAX_SYMBOLS - 1, 2), false);
    for s in 0..N_STATES {
        emiss_mask[(s, 0, 0)] = true;
        emiss_mask[(s, 1, 0)] = true;
        emiss_mask[(s, 0, 1)] = true;
    }
    MixtureHmm::new(
        &BLOCKS,
        transition.clone(),
        emission.clone(),
        init.to_vec(),
        trans_mask,
        emiss_mask,
        vec![true; N_STATES],
        N_SYMBOLS.to_vec(),
    )
    .expect("model construction failed")
}

fn eval(fx: &Fixture, transition: &Array2<f64>, emission: &Array3<f64>, init: &[f64], coefs: &Array2<f64>) -> f64 {
    let model = build_model(transition, emission, init);
    objective(&model, &fx.obs, &fx.x, coefs)
        .expect("objective failed")
        .objective
}

/// Move a simplex row by `delta` along unconstrained softmax coordinate `v`
/// and renormalize.
fn nudge(row: &[f64], v: usize, delta: f64) -> Vec<f64> {
    let mut theta: Vec<f64> = row.iter().map(|p| p.ln()).collect();
    theta[v] += delta;
    let sum: f64 = theta.iter().map(|t| t.exp()).sum();
    theta.iter().map(|t| t.exp() / sum).collect()
}

fn check(fd: f64, analytic: f64, what: &str) {
    let tol = 1e-4 * fd.abs().max(1e-3);
    assert!(
        (fd - analytic).abs() <= tol,
        "{what}: finite difference {fd} vs analytic {analytic}"
    );
}

#[test]
fn analytic_gradient_matches_finite_differences() {
    let fx = fixture();
    let model = build_model(&fx.transition, &fx.emission, &fx.init);
    let out = objective(&model, &fx.obs, &fx.x, &fx.coefs).expect("objective failed");
    assert_eq!(out.gradient.len(), model.grad_len(Q));

    let mut idx = 0usize;

    // Transition segment: blocks in order, rows within, free columns within.
    for block in 0..BLOCKS.len() {
        let off = if block == 0 { 0 } else { 2 };
        let size = BLOCKS[block];
        for i in 0..size {
            let s = off + i;
            let row: Vec<f64> = (0..size).map(|j| fx.transition[(s, off + j)]).collect();
            for j in 0..size {
                let mut fd = [0.0; 2];
                for (side, delta) in [EPS, -EPS].iter().enumerate() {
                    let bumped = nudge(&row, j, *delta);
                    let mut transition = fx.transition.clone();
                    for (jj, &p) in bumped.iter().enumerate() {
                        transition[(s, off + jj)] = p;
                    }
                    fd[side] = eval(&fx, &transition, &fx.emission, &fx.init, &fx.coefs);
                }
                let fd = (fd[0] - fd[1]) / (2.0 * EPS);
                check(fd, out.gradient[idx], &format!("transition ({s}, {j})"));
                idx += 1;
            }
        }
    }

    // Emission segment: channel-major, then state, then free symbol.
    for r in 0..2 {
        for s in 0..N_STATES {
            let n_sym = N_SYMBOLS[r];
            let free = if r == 0 { 2 } else { 1 };
            let row: Vec<f64> = (0..n_sym).map(|v| fx.emission[(s, v, r)]).collect();
            for v in 0..free {
                let mut fd = [0.0; 2];
                for (side, delta) in [EPS, -EPS].iter().enumerate() {
                    let bumped = nudge(&row, v, *delta);
                    let mut emission = fx.emission.clone();
                    for (vv, &p) in bumped.iter().enumerate() {
                        emission[(s, vv, r)] = p;
                    }
                    fd[side] = eval(&fx, &fx.transition, &emission, &fx.init, &fx.coefs);
                }
                let fd = (fd[0] - fd[1]) / (2.0 * EPS);
                check(fd, out.gradient[idx], &format!("emission ({s}, {v}, ch{r})"));
                idx += 1;
            }
        }
    }

    // Initial segment: per block slice.
    for block in 0..BLOCKS.len() {
        let off = if block == 0 { 0 } else { 2 };
        let size = BLOCKS[block];
        let row: Vec<f64> = (0..size).map(|j| fx.init[off + j]).collect();
        for j in 0..size {
            let mut fd = [0.0; 2];
            for (side, delta) in [EPS, -EPS].iter().enumerate() {
                let bumped = nudge(&row, j, *delta);
                let mut init = fx.init.clone();
                for (jj, &p) in bumped.iter().enumerate() {
                    init[off + jj] = p;
                }
                fd[side] = eval(&fx, &fx.transition, &fx.emission, &init, &fx.coefs);
            }
            let fd = (fd[0] - fd[1]) / (2.0 * EPS);
            check(fd, out.gradient[idx], &format!("initial ({}, {j})", off + j));
            idx += 1;
        }
    }

    // Mixture-coefficient segment: already unconstrained, perturb directly.
    for c in 0..Q {
        let mut fd = [0.0; 2];
        for (side, delta) in [EPS, -EPS].iter().enumerate() {
            let mut coefs = fx.coefs.clone();
            coefs[(c, 1)] += *delta;
            fd[side] = eval(&fx, &fx.transition, &fx.emission, &fx.init, &coefs);
        }
        let fd = (fd[0] - fd[1]) / (2.0 * EPS);
        check(fd, out.gradient[idx], &format!("coefficient ({c}, block 1)"));
        idx += 1;
    }

    assert_eq!(idx, out.gradient.len());
}

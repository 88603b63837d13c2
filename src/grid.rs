//! Exhaustive search over (alpha, beta, gamma) hyperparameter candidates.

use log::info;

/// Candidate values for one model parameter: a configured negative value
/// expands to the default sweep, anything in [0, 1] collapses to a
/// singleton.
pub fn axis_candidates(configured: f64, default_sweep: &[f64]) -> Vec<f64> {
    if !(0.0..=1.0).contains(&configured) {
        default_sweep.to_vec()
    } else {
        vec![configured]
    }
}

pub const DEFAULT_ALPHA_SWEEP: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];
pub const DEFAULT_BETA_SWEEP: [f64; 1] = [0.001];
pub const DEFAULT_GAMMA_SWEEP: [f64; 1] = [0.5];

/// Cartesian grid over the three model hyperparameters. The evaluation
/// callback is invoked serially; ties keep the first maximum so the result
/// is deterministic.
pub struct GridSearch {
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl GridSearch {
    pub fn from_configured(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            alpha: axis_candidates(alpha, &DEFAULT_ALPHA_SWEEP),
            beta: axis_candidates(beta, &DEFAULT_BETA_SWEEP),
            gamma: axis_candidates(gamma, &DEFAULT_GAMMA_SWEEP),
        }
    }

    pub fn num_combos(&self) -> usize {
        self.alpha.len() * self.beta.len() * self.gamma.len()
    }

    /// The single candidate tuple of a degenerate 1x1x1 grid.
    pub fn sole_point(&self) -> GridPoint {
        GridPoint {
            alpha: self.alpha[0],
            beta: self.beta[0],
            gamma: self.gamma[0],
        }
    }

    /// Evaluates every combination and returns the argmax tuple together
    /// with its goodness.
    pub fn evaluate(
        &self,
        mut objective: impl FnMut(GridPoint) -> f64,
    ) -> (GridPoint, f64) {
        let mut best = self.sole_point();
        let mut best_value = f64::NEG_INFINITY;
        for &alpha in &self.alpha {
            for &beta in &self.beta {
                for &gamma in &self.gamma {
                    let point = GridPoint { alpha, beta, gamma };
                    let value = objective(point);
                    info!(
                        "evaluated a={} b={} g={}: {:.6}",
                        alpha, beta, gamma, value
                    );
                    if value > best_value {
                        best_value = value;
                        best = point;
                    }
                }
            }
        }
        (best, best_value)
    }
}

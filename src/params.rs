//! Parameter surface of the inference engine, mirroring the keys the tool
//! exposes: model hyperparameters, loopy-belief-propagation settings and
//! grid-search options.

use serde::Deserialize;

use crate::error::InferenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Pick the next message by the largest difference to the last one sent
    Priority,
    /// First in, first out
    Fifo,
    /// Message passing follows a fresh random spanning tree each iteration
    RandomSpanningTree,
}

/// Model hyperparameters of the Bayesian network. A negative prior or
/// emission enables the grid search for that parameter.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Protein prior probability (gamma)
    pub prot_prior: f64,
    /// Peptide emission probability (alpha)
    pub pep_emission: f64,
    /// Spurious peptide identification probability (beta); usually much
    /// smaller than emission from proteins
    pub pep_spurious_emission: f64,
    /// Peptide prior probability; not part of the grid search
    pub pep_prior: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            prot_prior: -1.0,
            pep_emission: -1.0,
            pep_spurious_emission: -1.0,
            pep_prior: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LoopyBeliefPropagationParams {
    pub scheduling_type: SchedulingType,
    /// Below this message change a directed edge counts as converged
    pub convergence_threshold: f64,
    /// Convex weight of the old message in each update: 0 overwrites,
    /// values toward 1 slow updates down; 1 itself never converges and is
    /// rejected
    pub dampening_lambda: f64,
    /// Upper bound on message updates per connected component
    pub max_nr_iterations: u64,
    /// P-norm used to marginalize multidimensional factors: 1 is
    /// sum-product, values <= 0 select max-product
    pub p_norm_inference: f64,
}

impl Default for LoopyBeliefPropagationParams {
    fn default() -> Self {
        Self {
            scheduling_type: SchedulingType::Priority,
            convergence_threshold: 1e-5,
            dampening_lambda: 1e-3,
            max_nr_iterations: 1 << 31,
            p_norm_inference: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ParamOptimizeParams {
    /// Weight of AUC against posterior calibration in the grid-search
    /// objective, handed to the scoring callback
    pub aucweight: f64,
}

impl Default for ParamOptimizeParams {
    fn default() -> Self {
        Self { aucweight: 0.2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Consider only the top X PSMs per spectrum; 0 considers all
    pub top_psms: usize,
    /// Overwrite PSM scores with their posteriors
    pub update_psm_probabilities: bool,
    /// Use the current protein scores as user-defined priors
    pub user_defined_priors: bool,
    /// Annotate posteriors for indistinguishable protein groups
    pub annotate_group_probabilities: bool,
    pub model_parameters: ModelParams,
    pub loopy_belief_propagation: LoopyBeliefPropagationParams,
    pub param_optimize: ParamOptimizeParams,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            top_psms: 1,
            update_psm_probabilities: true,
            user_defined_priors: false,
            annotate_group_probabilities: true,
            model_parameters: ModelParams::default(),
            loopy_belief_propagation: LoopyBeliefPropagationParams::default(),
            param_optimize: ParamOptimizeParams::default(),
        }
    }
}

impl InferenceParams {
    pub fn validate(&self) -> Result<(), InferenceError> {
        let model = &self.model_parameters;
        for (name, value) in [
            ("model_parameters:prot_prior", model.prot_prior),
            ("model_parameters:pep_emission", model.pep_emission),
            (
                "model_parameters:pep_spurious_emission",
                model.pep_spurious_emission,
            ),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(InferenceError::Parameter(format!(
                    "{} must lie in [-1, 1], got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&model.pep_prior) {
            return Err(InferenceError::Parameter(format!(
                "model_parameters:pep_prior must lie in [0, 1], got {}",
                model.pep_prior
            )));
        }

        let lbp = &self.loopy_belief_propagation;
        if !lbp.convergence_threshold.is_finite() || lbp.convergence_threshold <= 0.0 {
            return Err(InferenceError::Parameter(format!(
                "loopy_belief_propagation:convergence_threshold must be finite and > 0, got {}",
                lbp.convergence_threshold
            )));
        }
        if !(0.0..1.0).contains(&lbp.dampening_lambda) {
            return Err(InferenceError::Parameter(format!(
                "loopy_belief_propagation:dampening_lambda must lie in [0, 1), got {}",
                lbp.dampening_lambda
            )));
        }
        if lbp.max_nr_iterations == 0 {
            return Err(InferenceError::Parameter(
                "loopy_belief_propagation:max_nr_iterations must be >= 1".into(),
            ));
        }
        if lbp.p_norm_inference.is_nan() {
            return Err(InferenceError::Parameter(
                "loopy_belief_propagation:p_norm_inference must not be NaN".into(),
            ));
        }

        let aucweight = self.param_optimize.aucweight;
        if !(0.0..=1.0).contains(&aucweight) {
            return Err(InferenceError::Parameter(format!(
                "param_optimize:aucweight must lie in [0, 1], got {}",
                aucweight
            )));
        }
        Ok(())
    }
}

//! Parameterized construction of the factor tables used by the inference
//! model: protein priors, peptide evidence, noisy-OR sum evidence and the
//! probabilistic adder tying group variables to their members.

use crate::error::InferenceError;
use crate::pmf::{TableFactor, Var};

/// Builds the factors of the Bayesian network from the model
/// hyperparameters. One factory is constructed per connected component with
/// the (alpha, beta, gamma) tuple currently under evaluation.
pub struct MessagePasserFactory {
    alpha: f64,
    beta: f64,
    gamma: f64,
    pep_prior: f64,
    p_norm: f64,
    next_aux: u32,
}

impl MessagePasserFactory {
    /// `p_norm <= 0` selects max-product inference.
    pub fn new(alpha: f64, beta: f64, gamma: f64, pep_prior: f64, p_norm: f64) -> Self {
        Self {
            alpha,
            beta,
            gamma,
            pep_prior,
            p_norm: if p_norm <= 0.0 { f64::INFINITY } else { p_norm },
            next_aux: 0,
        }
    }

    pub fn p_norm(&self) -> f64 {
        self.p_norm
    }

    /// Prior factor (1 - gamma, gamma) on a protein variable.
    pub fn create_protein_factor(&self, v: Var) -> TableFactor {
        self.create_protein_factor_with_prior(v, self.gamma)
    }

    /// Prior factor with a user-defined prior instead of gamma.
    pub fn create_protein_factor_with_prior(&self, v: Var, prior: f64) -> TableFactor {
        let prior = prior.clamp(0.0, 1.0);
        TableFactor::new(vec![v], vec![1.0 - prior, prior])
    }

    /// Emission factor (1 - s, s) for an observed PSM score.
    pub fn create_peptide_evidence_factor(&self, v: Var, score: f64) -> TableFactor {
        let s = score.clamp(0.0, 1.0);
        TableFactor::new(vec![v], vec![1.0 - s, s])
    }

    /// Prior factor on a peptide-group variable. The default pep_prior of
    /// 0.5 is uniform and leaves the marginals untouched.
    pub fn create_peptide_prior_factor(&self, v: Var) -> TableFactor {
        TableFactor::new(vec![v], vec![1.0 - self.pep_prior, self.pep_prior])
    }

    /// Noisy-OR emission of a PSM given its parent group, with evidence
    /// multiplicity `n` (the number of proteins the peptide maps to):
    ///
    ///   P(psm = 1 | parent = 0) = beta
    ///   P(psm = 1 | parent = 1) = 1 - (1 - alpha) * (1 - beta)^n
    ///
    /// `n = 1` is the basic noisy-OR.
    pub fn create_sum_evidence_factor(&self, n: usize, parent: Var, psm: Var) -> TableFactor {
        let off = self.beta;
        let on = 1.0 - (1.0 - self.alpha) * (1.0 - self.beta).powi(n.max(1) as i32);
        // bit 0 = parent, bit 1 = psm
        TableFactor::new(
            vec![parent, psm],
            vec![1.0 - off, 1.0 - on, off, on],
        )
    }

    /// OR relation between a group variable and its members: group = 1 iff
    /// at least one input = 1. Inputs of arity > 2 are decomposed into a
    /// convergecast chain of pairwise OR factors through auxiliary
    /// variables, so no emitted table exceeds eight entries.
    pub fn create_peptide_probabilistic_adder_factor(
        &mut self,
        inputs: &[Var],
        group: Var,
    ) -> Result<Vec<TableFactor>, InferenceError> {
        match inputs {
            [] => Err(InferenceError::GraphShape(
                "probabilistic adder with no inputs".into(),
            )),
            [single] => Ok(vec![equality_factor(*single, group)]),
            [a, b] => Ok(vec![or_factor(*a, *b, group)]),
            [a, b, rest @ ..] => {
                let mut factors = Vec::with_capacity(inputs.len() - 1);
                let mut carry = self.fresh_aux();
                factors.push(or_factor(*a, *b, carry));
                for (i, &input) in rest.iter().enumerate() {
                    let out = if i + 1 == rest.len() {
                        group
                    } else {
                        self.fresh_aux()
                    };
                    factors.push(or_factor(carry, input, out));
                    carry = out;
                }
                Ok(factors)
            }
        }
    }

    fn fresh_aux(&mut self) -> Var {
        let v = Var::Aux(self.next_aux);
        self.next_aux += 1;
        v
    }
}

/// F(a, g) = 1 iff g == a.
fn equality_factor(a: Var, g: Var) -> TableFactor {
    TableFactor::new(vec![a, g], vec![1.0, 0.0, 0.0, 1.0])
}

/// F(a, b, g) = 1 iff g == a | b.
fn or_factor(a: Var, b: Var, g: Var) -> TableFactor {
    let mut table = vec![0.0; 8];
    for cfg in 0..8usize {
        let (va, vb, vg) = (cfg & 1, (cfg >> 1) & 1, (cfg >> 2) & 1);
        if vg == (va | vb) {
            table[cfg] = 1.0;
        }
    }
    TableFactor::new(vec![a, b, g], table)
}

//! Runs loopy belief propagation to convergence and extracts single-variable
//! marginal factors.

use log::warn;

use crate::bp::builder::InferenceGraph;
use crate::bp::scheduler::{PropagationState, ScheduleStats, Scheduler};
use crate::error::InferenceError;
use crate::pmf::{Pmf, Var};

/// A single-variable marginal factor: the normalized product of all
/// messages arriving at the variable.
#[derive(Debug, Clone)]
pub struct Marginal {
    pub var: Var,
    pub pmf: Pmf,
}

pub struct BeliefPropagationEngine<'a> {
    scheduler: Scheduler,
    graph: &'a InferenceGraph,
    p_norm: f64,
}

impl<'a> BeliefPropagationEngine<'a> {
    pub fn new(scheduler: Scheduler, graph: &'a InferenceGraph, p_norm: f64) -> Self {
        Self {
            scheduler,
            graph,
            p_norm,
        }
    }

    /// Relax messages until convergence or the iteration cap, then return
    /// the marginal factor of every requested variable. The cap is an upper
    /// bound, not an error: marginals are extracted from the last messages.
    pub fn estimate_posteriors(&self, vars: &[Var]) -> Result<Vec<Marginal>, InferenceError> {
        let mut state = PropagationState::new(self.graph, self.p_norm);
        self.scheduler.add_ab_initio_edges(&mut state);
        let stats = self.scheduler.run(&mut state)?;
        self.warn_on_cap(&stats);

        vars.iter()
            .map(|&v| {
                let node = self.graph.var_node(v).ok_or_else(|| {
                    InferenceError::GraphShape(format!(
                        "posterior requested for a variable not in the factor graph: {:?}",
                        v
                    ))
                })?;
                let belief = state.belief_product(node);
                let mut pmf = Pmf::binary(belief[0], belief[1]);
                pmf.normalize()?;
                Ok(Marginal { var: v, pmf })
            })
            .collect()
    }

    fn warn_on_cap(&self, stats: &ScheduleStats) {
        if !stats.converged {
            warn!(
                "loopy belief propagation hit the iteration cap after {} updates \
                 (last message change {:.3e}); extracting marginals from the current messages",
                stats.iterations, stats.final_max_delta
            );
        }
    }
}

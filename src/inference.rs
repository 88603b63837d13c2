//! Per-component inference functors and the top-level orchestration of
//! posterior estimation: graph construction, hyperparameter grid search,
//! the final inference pass and group annotation.

use std::time::Instant;

use log::{debug, info, warn};

use crate::bp::{BeliefPropagationEngine, BetheGraphBuilder, Scheduler};
use crate::error::InferenceError;
use crate::factory::MessagePasserFactory;
use crate::graph::{CcView, IdVertex, IdentificationGraph, PosteriorUpdate};
use crate::grid::{GridPoint, GridSearch};
use crate::ident::{
    IndistinguishableGroup, PeptideIdentification, ProteinIdentification, PRIOR_META_KEY,
};
use crate::params::InferenceParams;
use crate::pmf::Var;

/// External scoring callback for the grid search, typically an AUC-weighted
/// FDR evaluation of the current protein scores. Higher is better.
pub trait PosteriorEvaluator {
    fn evaluate(&self, prots: &ProteinIdentification, auc_weight: f64) -> f64;
}

impl<F> PosteriorEvaluator for F
where
    F: Fn(&ProteinIdentification, f64) -> f64,
{
    fn evaluate(&self, prots: &ProteinIdentification, auc_weight: f64) -> f64 {
        self(prots, auc_weight)
    }
}

/// Outcome of one orchestration call.
#[derive(Debug, Clone, Copy)]
pub struct InferenceReport {
    /// The hyperparameters of the final inference pass
    pub best: GridPoint,
    /// Number of grid combinations evaluated (0 for a degenerate grid)
    pub grid_evaluations: usize,
    pub connected_components: usize,
}

/// Builds the per-component inference functor for one hyperparameter tuple.
/// Recoverable per-component failures (malformed shapes, numeric underflow)
/// are logged and yield no updates, so the scores of the affected component
/// stay untouched and the remaining components are unaffected.
pub fn inference_functor<'p>(
    point: GridPoint,
    params: &'p InferenceParams,
    update_psm_probabilities: bool,
    annotate_group_probabilities: bool,
) -> impl Fn(CcView<'_>) -> Vec<PosteriorUpdate> + Sync + 'p {
    move |cc: CcView<'_>| {
        if cc.vertices().len() < 2 || !cc.has_multiple_kinds() {
            debug!("skipped component with only one vertex kind");
            return Vec::new();
        }
        match infer_component(
            &cc,
            point,
            params,
            update_psm_probabilities,
            annotate_group_probabilities,
        ) {
            Ok(updates) => updates,
            Err(err) => {
                warn!(
                    "LBP encountered a problem in a connected component; \
                     skipping inference there. ({})",
                    err
                );
                Vec::new()
            }
        }
    }
}

fn infer_component(
    cc: &CcView<'_>,
    point: GridPoint,
    params: &InferenceParams,
    update_psm_probabilities: bool,
    annotate_group_probabilities: bool,
) -> Result<Vec<PosteriorUpdate>, InferenceError> {
    let lbp = &params.loopy_belief_propagation;
    let mut factory = MessagePasserFactory::new(
        point.alpha,
        point.beta,
        point.gamma,
        params.model_parameters.pep_prior,
        lbp.p_norm_inference,
    );
    let mut builder = BetheGraphBuilder::default();
    let mut posterior_vertices: Vec<u32> = Vec::new();

    for &v in cc.vertices() {
        let inputs = cc.inputs(v);
        match *cc.vertex(v) {
            IdVertex::Psm { id, hit } => {
                let pep = &cc.peps[id].hits[hit];
                let parent = *inputs.first().ok_or_else(|| {
                    InferenceError::GraphShape(format!("PSM vertex {} has no inputs", v))
                })?;
                builder.insert_dependency(factory.create_sum_evidence_factor(
                    pep.evidences.len().max(1),
                    Var::Node(parent),
                    Var::Node(v),
                ));
                builder
                    .insert_dependency(factory.create_peptide_evidence_factor(Var::Node(v), pep.score));
                if update_psm_probabilities {
                    posterior_vertices.push(v);
                }
            }
            IdVertex::PeptideGroup { .. } => {
                let members: Vec<Var> = inputs.iter().map(|&u| Var::Node(u)).collect();
                let factors =
                    factory.create_peptide_probabilistic_adder_factor(&members, Var::Node(v))?;
                builder.insert_dependencies(factors);
                builder.insert_dependency(factory.create_peptide_prior_factor(Var::Node(v)));
            }
            IdVertex::ProteinGroup { .. } => {
                let members: Vec<Var> = inputs.iter().map(|&u| Var::Node(u)).collect();
                let factors =
                    factory.create_peptide_probabilistic_adder_factor(&members, Var::Node(v))?;
                builder.insert_dependencies(factors);
                if annotate_group_probabilities {
                    posterior_vertices.push(v);
                }
            }
            IdVertex::Protein { hit } => {
                let factor = if params.user_defined_priors {
                    // fall back to gamma when no prior was stashed
                    let prior = cc.prots.hits[hit]
                        .meta
                        .get(PRIOR_META_KEY)
                        .copied()
                        .unwrap_or(point.gamma);
                    factory.create_protein_factor_with_prior(Var::Node(v), prior)
                } else {
                    factory.create_protein_factor(Var::Node(v))
                };
                builder.insert_dependency(factor);
                posterior_vertices.push(v);
            }
        }
    }

    let graph = builder.to_graph();
    let scheduler = Scheduler {
        scheduling_type: lbp.scheduling_type,
        lambda: lbp.dampening_lambda,
        convergence_threshold: lbp.convergence_threshold,
        max_iterations: lbp.max_nr_iterations,
        seed: cc.cc_index as u64,
    };
    let engine = BeliefPropagationEngine::new(scheduler, &graph, factory.p_norm());

    let requested: Vec<Var> = posterior_vertices.iter().map(|&v| Var::Node(v)).collect();
    let marginals = engine.estimate_posteriors(&requested)?;

    Ok(posterior_vertices
        .iter()
        .zip(marginals)
        .map(|(&v, marginal)| {
            let posterior = marginal.pmf.p_present().clamp(0.0, 1.0);
            match *cc.vertex(v) {
                IdVertex::Protein { hit } => PosteriorUpdate::ProteinScore { hit, posterior },
                IdVertex::Psm { id, hit } => PosteriorUpdate::PsmScore { id, hit, posterior },
                IdVertex::ProteinGroup { .. } | IdVertex::PeptideGroup { .. } => {
                    PosteriorUpdate::GroupPosterior {
                        vertex: v,
                        posterior,
                    }
                }
            }
        })
        .collect())
}

/// Walks each component and materializes one indistinguishable-group record
/// per protein-group vertex, carrying the group's posterior (or its current
/// aggregate when posteriors were not requested) and the accessions of the
/// adjacent proteins. Runs single-threaded so records append in component
/// order.
pub fn annotate_indistinguishable_groups(
    graph: &IdentificationGraph,
    prots: &mut ProteinIdentification,
    peps: &[PeptideIdentification],
) {
    let groups = graph.apply_functor_on_ccs_st(prots, peps, |cc| {
        if cc.vertices().len() < 2 {
            return Vec::new();
        }
        cc.vertices()
            .iter()
            .filter_map(|&v| match *cc.vertex(v) {
                IdVertex::ProteinGroup { posterior } => {
                    let accessions = cc
                        .neighbors(v)
                        .iter()
                        .filter_map(|&u| cc.protein_accession(u))
                        .map(String::from)
                        .collect();
                    Some(IndistinguishableGroup {
                        probability: posterior,
                        accessions,
                    })
                }
                _ => None,
            })
            .collect()
    });
    prots.indistinguishable_groups.extend(groups);
}

/// Top-level entry point: validates parameters, builds and clusters the
/// identification graph, grid-searches (alpha, beta, gamma) when any axis
/// has more than one candidate, runs the final inference pass with the best
/// tuple and annotates indistinguishable groups.
///
/// During the grid search PSM updates and group annotation are disabled;
/// the caller's preferences apply to the final pass only.
pub fn infer_posterior_probabilities(
    params: &InferenceParams,
    prots: &mut ProteinIdentification,
    peps: &mut [PeptideIdentification],
    evaluator: &dyn PosteriorEvaluator,
) -> Result<InferenceReport, InferenceError> {
    params.validate()?;
    let start = Instant::now();

    prots.score_type = "Posterior Probability".into();
    prots.higher_score_better = true;
    prots.search_engine = "Epifany".into();

    if params.user_defined_priors {
        for hit in &mut prots.hits {
            hit.meta.insert(PRIOR_META_KEY.to_string(), hit.score);
        }
    }

    let mut graph = IdentificationGraph::build_graph(prots, peps, params.top_psms);
    graph.compute_connected_components();
    graph.cluster_indist_proteins_and_peptides();

    let model = &params.model_parameters;
    let grid = GridSearch::from_configured(
        model.pep_emission,
        model.pep_spurious_emission,
        model.prot_prior,
    );

    let mut grid_evaluations = 0usize;
    let best = if grid.num_combos() > 1 {
        info!("testing {} parameter combinations", grid.num_combos());
        let auc_weight = params.param_optimize.aucweight;
        let (best, value) = grid.evaluate(|point| {
            grid_evaluations += 1;
            graph.apply_functor_on_ccs(prots, peps, inference_functor(point, params, false, false));
            evaluator.evaluate(prots, auc_weight)
        });
        info!(
            "best parameters found at a={}, b={}, g={} (goodness {:.6})",
            best.alpha, best.beta, best.gamma, value
        );
        best
    } else {
        info!("only one parameter combination specified; skipping grid search");
        grid.sole_point()
    };

    graph.apply_functor_on_ccs(
        prots,
        peps,
        inference_functor(
            best,
            params,
            params.update_psm_probabilities,
            params.annotate_group_probabilities,
        ),
    );

    annotate_indistinguishable_groups(&graph, prots, peps);

    info!(
        "posterior inference finished in {:?}ms",
        start.elapsed().as_millis()
    );
    Ok(InferenceReport {
        best,
        grid_evaluations,
        connected_components: graph.connected_components().len(),
    })
}

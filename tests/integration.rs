use epifany_core::ident::{
    PeptideHit, PeptideIdentification, ProteinHit, ProteinIdentification,
};
use epifany_core::inference::infer_posterior_probabilities;
use epifany_core::params::{InferenceParams, SchedulingType};

fn protein(accession: &str, score: f64) -> ProteinHit {
    ProteinHit::new(accession, score)
}

fn psm(sequence: &str, score: f64, evidences: &[&str]) -> PeptideIdentification {
    PeptideIdentification::new(vec![PeptideHit::new(
        sequence,
        score,
        evidences.iter().map(|s| s.to_string()).collect(),
    )])
}

/// Singleton model parameters and convergence settings tight enough for
/// exact agreement on tree-shaped components.
fn exact_params(alpha: f64, beta: f64, gamma: f64) -> InferenceParams {
    let mut params = InferenceParams::default();
    params.model_parameters.pep_emission = alpha;
    params.model_parameters.pep_spurious_emission = beta;
    params.model_parameters.prot_prior = gamma;
    params.loopy_belief_propagation.convergence_threshold = 1e-12;
    params.loopy_belief_propagation.dampening_lambda = 0.0;
    params.loopy_belief_propagation.max_nr_iterations = 1_000_000;
    params
}

fn refuse_to_evaluate(_: &ProteinIdentification, _: f64) -> f64 {
    panic!("the scoring callback must not be called for a degenerate grid");
}

/// Closed form for one protein with one PSM of score `s`.
fn single_psm_posterior(alpha: f64, beta: f64, gamma: f64, s: f64) -> f64 {
    let on = 1.0 - (1.0 - alpha) * (1.0 - beta);
    let present = gamma * (on * s + (1.0 - on) * (1.0 - s));
    let absent = (1.0 - gamma) * (beta * s + (1.0 - beta) * (1.0 - s));
    present / (present + absent)
}

#[test]
fn single_protein_single_psm_matches_closed_form() {
    let (alpha, beta, gamma, score) = (0.8, 0.01, 0.5, 0.9);
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.0)]);
    let mut peps = vec![psm("AAK", score, &["P1"])];

    let params = exact_params(alpha, beta, gamma);
    let report =
        infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
            .unwrap();

    let expected = single_psm_posterior(alpha, beta, gamma, score);
    assert!((prots.hits[0].score - expected).abs() < 1e-9);
    assert_eq!(report.grid_evaluations, 0);
    assert_eq!(prots.score_type, "Posterior Probability");
    assert!(prots.higher_score_better);
    assert_eq!(prots.search_engine, "Epifany");
}

#[test]
fn fifo_without_damping_reaches_the_exact_marginal_on_a_tree() {
    let (alpha, beta, gamma, score) = (0.7, 0.05, 0.3, 0.85);
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.0)]);
    let mut peps = vec![psm("AAK", score, &["P1"])];

    let mut params = exact_params(alpha, beta, gamma);
    params.loopy_belief_propagation.scheduling_type = SchedulingType::Fifo;
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    let expected = single_psm_posterior(alpha, beta, gamma, score);
    assert!((prots.hits[0].score - expected).abs() < 1e-9);
}

#[test]
fn indistinguishable_proteins_share_posterior_and_one_group() {
    let mut prots =
        ProteinIdentification::new(vec![protein("P1", 0.0), protein("P2", 0.0)]);
    let mut peps = vec![
        psm("AAK", 0.9, &["P1", "P2"]),
        psm("CCK", 0.8, &["P1", "P2"]),
    ];

    let params = exact_params(0.8, 0.01, 0.5);
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    assert!((prots.hits[0].score - prots.hits[1].score).abs() < 1e-12);
    assert!(prots.hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));

    assert_eq!(prots.indistinguishable_groups.len(), 1);
    let group = &prots.indistinguishable_groups[0];
    let mut accessions = group.accessions.clone();
    accessions.sort();
    assert_eq!(accessions, vec!["P1".to_string(), "P2".to_string()]);
    assert!((0.0..=1.0).contains(&group.probability));
}

#[test]
fn isolated_protein_is_left_untouched() {
    let mut prots = ProteinIdentification::new(vec![
        protein("P1", 0.0),
        protein("LONER", 0.123),
    ]);
    let mut peps = vec![psm("AAK", 0.9, &["P1"])];

    let mut params = exact_params(0.8, 0.01, 0.5);
    params.user_defined_priors = false;
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    assert_eq!(prots.hits[1].score, 0.123);
    assert_ne!(prots.hits[0].score, 0.0);
}

#[test]
fn iteration_cap_still_writes_posteriors() {
    // shared and unique peptides keep both proteins in one component
    let mut prots = ProteinIdentification::new(vec![protein("P1", 2.0), protein("P2", 2.0)]);
    let mut peps = vec![
        psm("AAK", 0.9, &["P1", "P2"]),
        psm("CCK", 0.8, &["P1"]),
        psm("DDR", 0.7, &["P2"]),
    ];

    let mut params = exact_params(1.0, 0.0, 0.5);
    params.loopy_belief_propagation.max_nr_iterations = 2;
    let report =
        infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
            .unwrap();

    // no error, posteriors from the last iteration are written
    assert_eq!(report.connected_components, 1);
    for hit in &prots.hits {
        assert!((0.0..=1.0).contains(&hit.score));
    }
}

#[test]
fn grid_search_selects_the_best_alpha() {
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.0)]);
    let mut peps = vec![psm("AAK", 0.9, &["P1"])];

    let mut params = exact_params(-1.0, 0.01, 0.5);
    params.update_psm_probabilities = true;

    // the posterior is strictly increasing in alpha, so maximizing the
    // protein score selects the largest candidate
    let evaluator = |prots: &ProteinIdentification, _auc_weight: f64| prots.hits[0].score;
    let original_psm_score = peps[0].hits[0].score;
    let report =
        infer_posterior_probabilities(&params, &mut prots, &mut peps, &evaluator).unwrap();

    assert_eq!(report.best.alpha, 0.9);
    assert_eq!(report.grid_evaluations, 5);
    assert!((prots.hits[0].score - single_psm_posterior(0.9, 0.01, 0.5, 0.9)).abs() < 1e-9);
    // PSM updates were suppressed during the search but honored in the
    // final pass
    assert_ne!(peps[0].hits[0].score, original_psm_score);
    assert!((0.0..=1.0).contains(&peps[0].hits[0].score));
}

#[test]
fn degenerate_grid_matches_direct_run() {
    let build = || {
        (
            ProteinIdentification::new(vec![protein("P1", 0.0), protein("P2", 0.0)]),
            vec![
                psm("AAK", 0.9, &["P1"]),
                psm("CCK", 0.6, &["P1", "P2"]),
                psm("DDR", 0.4, &["P2"]),
            ],
        )
    };

    let params = exact_params(0.5, 0.01, 0.5);
    let (mut prots_direct, mut peps_direct) = build();
    infer_posterior_probabilities(
        &params,
        &mut prots_direct,
        &mut peps_direct,
        &refuse_to_evaluate,
    )
    .unwrap();

    // a sweep whose objective rewards agreement with the direct posteriors
    // must settle on the same parameters and reproduce them exactly
    let target = prots_direct.hits[0].score;
    let evaluator =
        move |prots: &ProteinIdentification, _: f64| -(prots.hits[0].score - target).abs();
    let grid_params = exact_params(-1.0, 0.01, 0.5);
    let (mut prots_grid, mut peps_grid) = build();
    let report =
        infer_posterior_probabilities(&grid_params, &mut prots_grid, &mut peps_grid, &evaluator)
            .unwrap();

    assert_eq!(report.best.alpha, 0.5);
    for (a, b) in prots_direct.hits.iter().zip(&prots_grid.hits) {
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
}

#[test]
fn numeric_failure_skips_the_component_and_spares_the_rest() {
    // gamma = 0 forces the protein absent while a certain PSM insists on
    // being present: the messages underflow to all-zero mass
    let mut prots = ProteinIdentification::new(vec![
        protein("P1", 0.42),
        protein("P2", 0.42),
    ]);
    let mut peps = vec![psm("AAK", 1.0, &["P1"]), psm("CCK", 0.8, &["P2"])];

    let mut params = exact_params(1.0, 0.0, 0.0);
    params.update_psm_probabilities = true;
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    // the failing component keeps its pre-inference scores
    assert_eq!(prots.hits[0].score, 0.42);
    assert_eq!(peps[0].hits[0].score, 1.0);
    // the healthy component was still inferred
    assert_ne!(prots.hits[1].score, 0.42);
    assert!((0.0..=1.0).contains(&prots.hits[1].score));
}

#[test]
fn psm_scores_are_unchanged_unless_requested() {
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.0)]);
    let mut peps = vec![psm("AAK", 0.9, &["P1"]), psm("CCK", 0.4, &["P1"])];

    let mut params = exact_params(0.8, 0.01, 0.5);
    params.update_psm_probabilities = false;
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    assert_eq!(peps[0].hits[0].score, 0.9);
    assert_eq!(peps[1].hits[0].score, 0.4);
}

#[test]
fn user_defined_priors_are_stashed_and_used() {
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.9)]);
    let mut peps = vec![psm("AAK", 0.8, &["P1"])];

    let mut params = exact_params(0.7, 0.01, 0.2);
    params.user_defined_priors = true;
    infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate).unwrap();

    assert_eq!(prots.hits[0].meta.get("Prior"), Some(&0.9));
    // the stored prior, not gamma, feeds the protein factor
    let expected = single_psm_posterior(0.7, 0.01, 0.9, 0.8);
    assert!((prots.hits[0].score - expected).abs() < 1e-9);
}

#[test]
fn runs_are_bit_identical_for_deterministic_schedulers() {
    let build = || {
        (
            ProteinIdentification::new(vec![
                protein("P1", 0.0),
                protein("P2", 0.0),
                protein("P3", 0.0),
            ]),
            vec![
                psm("AAK", 0.9, &["P1", "P2"]),
                psm("CCK", 0.7, &["P2", "P3"]),
                psm("DDR", 0.6, &["P1"]),
                psm("EEK", 0.5, &["P3"]),
            ],
        )
    };

    for ty in [SchedulingType::Priority, SchedulingType::Fifo] {
        let mut params = exact_params(0.8, 0.01, 0.5);
        params.loopy_belief_propagation.scheduling_type = ty;
        params.loopy_belief_propagation.convergence_threshold = 1e-9;
        params.loopy_belief_propagation.dampening_lambda = 1e-3;

        let run = || {
            let (mut prots, mut peps) = build();
            infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
                .unwrap();
            prots
                .hits
                .iter()
                .map(|h| h.score.to_bits())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}

#[test]
fn spanning_tree_scheduling_is_reproducible() {
    // pairwise-shared peptides close a cycle through the peptide groups
    let build = || {
        (
            ProteinIdentification::new(vec![
                protein("P1", 0.0),
                protein("P2", 0.0),
                protein("P3", 0.0),
            ]),
            vec![
                psm("AAK", 0.9, &["P1", "P2"]),
                psm("CCK", 0.7, &["P2", "P3"]),
                psm("DDR", 0.6, &["P1", "P3"]),
            ],
        )
    };

    let mut params = exact_params(0.8, 0.01, 0.5);
    params.loopy_belief_propagation.scheduling_type = SchedulingType::RandomSpanningTree;
    params.loopy_belief_propagation.convergence_threshold = 1e-9;
    params.loopy_belief_propagation.dampening_lambda = 0.1;
    params.loopy_belief_propagation.max_nr_iterations = 10_000;

    let run = || {
        let (mut prots, mut peps) = build();
        infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
            .unwrap();
        prots
            .hits
            .iter()
            .map(|h| h.score.to_bits())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn invalid_parameters_fail_fast() {
    let mut prots = ProteinIdentification::new(vec![protein("P1", 0.0)]);
    let mut peps = vec![psm("AAK", 0.9, &["P1"])];

    let mut params = exact_params(0.8, 0.01, 0.5);
    params.loopy_belief_propagation.dampening_lambda = 1.0;
    let err = infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
        .unwrap_err();
    assert!(matches!(
        err,
        epifany_core::error::InferenceError::Parameter(_)
    ));
    // fatal before any side effect on the identifications
    assert_eq!(prots.hits[0].score, 0.0);
}

mod properties {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A small random protein/PSM association with scores in [0, 1].
    #[derive(Debug, Clone)]
    struct RandomNetwork {
        num_proteins: usize,
        psms: Vec<(Vec<usize>, f64)>,
    }

    impl Arbitrary for RandomNetwork {
        fn arbitrary(g: &mut Gen) -> Self {
            let num_proteins = usize::arbitrary(g) % 4 + 1;
            let num_psms = usize::arbitrary(g) % 6 + 1;
            let psms = (0..num_psms)
                .map(|_| {
                    let mut evidences: Vec<usize> = (0..num_proteins)
                        .filter(|_| bool::arbitrary(g))
                        .collect();
                    if evidences.is_empty() {
                        evidences.push(usize::arbitrary(g) % num_proteins);
                    }
                    let score = f64::from(u8::arbitrary(g)) / 255.0;
                    (evidences, score)
                })
                .collect();
            Self {
                num_proteins,
                psms,
            }
        }
    }

    #[quickcheck]
    fn posteriors_stay_probabilities(network: RandomNetwork) {
        let mut prots = ProteinIdentification::new(
            (0..network.num_proteins)
                .map(|i| protein(&format!("P{}", i), 0.5))
                .collect(),
        );
        let mut peps: Vec<PeptideIdentification> = network
            .psms
            .iter()
            .enumerate()
            .map(|(i, (evidences, score))| {
                PeptideIdentification::new(vec![PeptideHit::new(
                    format!("PEP{}", i),
                    *score,
                    evidences.iter().map(|p| format!("P{}", p)).collect(),
                )])
            })
            .collect();

        let mut params = exact_params(0.7, 0.01, 0.3);
        params.update_psm_probabilities = true;
        params.loopy_belief_propagation.convergence_threshold = 1e-6;
        params.loopy_belief_propagation.dampening_lambda = 1e-3;
        params.loopy_belief_propagation.max_nr_iterations = 10_000;

        infer_posterior_probabilities(&params, &mut prots, &mut peps, &refuse_to_evaluate)
            .unwrap();

        for hit in &prots.hits {
            assert!((0.0..=1.0).contains(&hit.score), "protein {}", hit.accession);
        }
        for pep in &peps {
            for hit in &pep.hits {
                assert!((0.0..=1.0).contains(&hit.score), "psm {}", hit.sequence);
            }
        }
    }
}

//! Caller-owned identification data mutated in place by the inference engine.

use fnv::FnvHashMap;
use serde::Serialize;

/// Meta key under which a protein's pre-inference score is stashed when
/// user-defined priors are enabled.
pub const PRIOR_META_KEY: &str = "Prior";

#[derive(Debug, Clone, Serialize)]
pub struct ProteinHit {
    /// Database accession
    pub accession: String,
    /// Current score; overwritten with the posterior P(present = 1)
    pub score: f64,
    /// Key-value annotations. Keys used by this crate: `"Prior"`
    #[serde(skip_serializing_if = "FnvHashMap::is_empty")]
    pub meta: FnvHashMap<String, f64>,
}

impl ProteinHit {
    pub fn new(accession: impl Into<String>, score: f64) -> Self {
        Self {
            accession: accession.into(),
            score,
            meta: FnvHashMap::default(),
        }
    }
}

/// A peptide-spectrum match: the observation that a spectrum matched a
/// candidate peptide with a given score.
#[derive(Debug, Clone, Serialize)]
pub struct PeptideHit {
    pub sequence: String,
    /// Score in [0,1], interpreted as 1 - posterior error probability.
    /// Overwritten with P(psm = 1) when PSM updates are enabled.
    pub score: f64,
    /// Accessions of the proteins this peptide maps to. The evidence
    /// multiplicity of the PSM is the length of this list.
    pub evidences: Vec<String>,
}

impl PeptideHit {
    pub fn new(sequence: impl Into<String>, score: f64, evidences: Vec<String>) -> Self {
        Self {
            sequence: sequence.into(),
            score,
            evidences,
        }
    }
}

/// All PSMs for one spectrum, ranked by score descending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeptideIdentification {
    pub hits: Vec<PeptideHit>,
}

impl PeptideIdentification {
    pub fn new(hits: Vec<PeptideHit>) -> Self {
        Self { hits }
    }
}

/// A set of proteins indistinguishable by the experimentally observed PSMs,
/// with the posterior of the group variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndistinguishableGroup {
    pub probability: f64,
    pub accessions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProteinIdentification {
    pub score_type: String,
    pub higher_score_better: bool,
    pub search_engine: String,
    pub hits: Vec<ProteinHit>,
    pub indistinguishable_groups: Vec<IndistinguishableGroup>,
}

impl ProteinIdentification {
    pub fn new(hits: Vec<ProteinHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }
}

//! The identification graph: a labelled undirected graph over protein hits,
//! PSMs and the group vertices introduced by indistinguishability
//! clustering, decomposed into connected components that are processed
//! independently (and in parallel) by inference functors.

use std::time::Instant;

use fnv::FnvHashMap;
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;

use crate::ident::{PeptideHit, PeptideIdentification, ProteinIdentification};

/// A vertex of the identification graph. The variants are strictly ordered
/// by their `which` discriminant; edges only connect differing kinds, and
/// the "inputs" of a vertex are its neighbors of strictly lower kind.
#[derive(Debug, Clone)]
pub enum IdVertex {
    /// which = 0; index into `ProteinIdentification::hits`
    Protein { hit: usize },
    /// which = 1; aggregate presence probability of an indistinguishable
    /// protein group
    ProteinGroup { posterior: f64 },
    /// which = 2; aggregate presence probability of a peptide group
    PeptideGroup { posterior: f64 },
    /// which = 6; indices into `peps[id].hits[hit]`
    Psm { id: usize, hit: usize },
}

impl IdVertex {
    pub fn which(&self) -> u8 {
        match self {
            IdVertex::Protein { .. } => 0,
            IdVertex::ProteinGroup { .. } => 1,
            IdVertex::PeptideGroup { .. } => 2,
            IdVertex::Psm { .. } => 6,
        }
    }
}

/// A posterior produced by an inference functor, to be written back after
/// the parallel section. Updates from different connected components touch
/// disjoint targets, so application order does not matter.
#[derive(Debug, Clone, Copy)]
pub enum PosteriorUpdate {
    ProteinScore { hit: usize, posterior: f64 },
    PsmScore { id: usize, hit: usize, posterior: f64 },
    GroupPosterior { vertex: u32, posterior: f64 },
}

/// Read-only view of one connected component handed to a functor.
#[derive(Clone, Copy)]
pub struct CcView<'a> {
    graph: &'a IdentificationGraph,
    pub cc_index: usize,
    pub prots: &'a ProteinIdentification,
    pub peps: &'a [PeptideIdentification],
}

impl<'a> CcView<'a> {
    pub fn vertices(&self) -> &'a [u32] {
        &self.graph.ccs[self.cc_index]
    }

    pub fn vertex(&self, v: u32) -> &'a IdVertex {
        &self.graph.vertices[v as usize]
    }

    pub fn neighbors(&self, v: u32) -> &'a [u32] {
        &self.graph.adjacency[v as usize]
    }

    /// Neighbors with strictly lower `which`, ascending by vertex id.
    pub fn inputs(&self, v: u32) -> Vec<u32> {
        let which = self.vertex(v).which();
        self.neighbors(v)
            .iter()
            .copied()
            .filter(|&u| self.vertex(u).which() < which)
            .collect()
    }

    /// A component with a single vertex kind carries no evidence structure
    /// and is skipped by every functor.
    pub fn has_multiple_kinds(&self) -> bool {
        self.vertices()
            .iter()
            .map(|&v| self.vertex(v).which())
            .dedup()
            .nth(1)
            .is_some()
    }

    pub fn psm_hit(&self, v: u32) -> Option<&'a PeptideHit> {
        match *self.vertex(v) {
            IdVertex::Psm { id, hit } => Some(&self.peps[id].hits[hit]),
            _ => None,
        }
    }

    pub fn protein_accession(&self, v: u32) -> Option<&'a str> {
        match *self.vertex(v) {
            IdVertex::Protein { hit } => Some(&self.prots.hits[hit].accession),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentificationGraph {
    vertices: Vec<IdVertex>,
    adjacency: Vec<Vec<u32>>,
    ccs: Vec<Vec<u32>>,
}

impl IdentificationGraph {
    /// Builds the bipartite protein/PSM graph. Only the `top_psms` best
    /// hits of each peptide identification are retained (0 keeps all);
    /// evidences naming accessions absent from the protein hits are
    /// dropped with a warning. Proteins without any retained PSM never
    /// enter the graph and are left untouched by inference.
    pub fn build_graph(
        prots: &ProteinIdentification,
        peps: &[PeptideIdentification],
        top_psms: usize,
    ) -> Self {
        let start = Instant::now();
        let accession_to_hit: FnvHashMap<&str, usize> = prots
            .hits
            .iter()
            .enumerate()
            .map(|(i, h)| (h.accession.as_str(), i))
            .collect();

        let mut graph = Self::default();
        let mut protein_vertex: FnvHashMap<usize, u32> = FnvHashMap::default();

        for (id, pep_id) in peps.iter().enumerate() {
            let mut order: Vec<usize> = (0..pep_id.hits.len()).collect();
            order.sort_by(|&a, &b| pep_id.hits[b].score.total_cmp(&pep_id.hits[a].score));
            let keep = match top_psms {
                0 => order.len(),
                n => n.min(order.len()),
            };
            for &hit in &order[..keep] {
                let psm = graph.add_vertex(IdVertex::Psm { id, hit });
                for accession in &pep_id.hits[hit].evidences {
                    match accession_to_hit.get(accession.as_str()) {
                        Some(&hit_ix) => {
                            let prot = *protein_vertex
                                .entry(hit_ix)
                                .or_insert_with(|| graph.add_vertex(IdVertex::Protein { hit: hit_ix }));
                            graph.add_edge(prot, psm);
                        }
                        None => {
                            warn!(
                                "PSM {}/{} references unknown accession {}; ignoring the evidence",
                                id, hit, accession
                            );
                        }
                    }
                }
            }
        }

        info!(
            "built identification graph with {} vertices in {:?}ms",
            graph.vertices.len(),
            start.elapsed().as_millis()
        );
        graph
    }

    fn add_vertex(&mut self, vertex: IdVertex) -> u32 {
        self.vertices.push(vertex);
        self.adjacency.push(Vec::new());
        self.vertices.len() as u32 - 1
    }

    fn add_edge(&mut self, a: u32, b: u32) {
        if !self.adjacency[a as usize].contains(&b) {
            self.adjacency[a as usize].push(b);
            self.adjacency[b as usize].push(a);
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, v: u32) -> &IdVertex {
        &self.vertices[v as usize]
    }

    pub fn connected_components(&self) -> &[Vec<u32>] {
        &self.ccs
    }

    /// Union-find decomposition. Components are sorted by their smallest
    /// member and members sorted ascending, so iteration is deterministic.
    pub fn compute_connected_components(&mut self) {
        let n = self.vertices.len();
        let mut parent: Vec<u32> = (0..n as u32).collect();

        fn find(parent: &mut [u32], mut v: u32) -> u32 {
            while parent[v as usize] != v {
                parent[v as usize] = parent[parent[v as usize] as usize];
                v = parent[v as usize];
            }
            v
        }

        for v in 0..n as u32 {
            for &u in &self.adjacency[v as usize] {
                let (rv, ru) = (find(&mut parent, v), find(&mut parent, u));
                if rv != ru {
                    parent[rv.max(ru) as usize] = rv.min(ru);
                }
            }
        }

        let mut by_root: FnvHashMap<u32, Vec<u32>> = FnvHashMap::default();
        for v in 0..n as u32 {
            by_root.entry(find(&mut parent, v)).or_default().push(v);
        }
        self.ccs = by_root
            .into_iter()
            .sorted_by_key(|(root, _)| *root)
            .map(|(_, mut members)| {
                members.sort_unstable();
                members
            })
            .collect();
        for adj in &mut self.adjacency {
            adj.sort_unstable();
        }
    }

    /// Materializes group vertices: one PeptideGroup per distinct set of
    /// parent proteins (rewired so every PSM has exactly one input), and
    /// one ProteinGroup per set of two or more proteins with identical
    /// observed peptide sets. Recomputes the component decomposition.
    pub fn cluster_indist_proteins_and_peptides(&mut self) {
        let start = Instant::now();

        // peptide groups: PSMs keyed by their parent protein set
        let mut by_parents: FnvHashMap<Vec<u32>, Vec<u32>> = FnvHashMap::default();
        for v in 0..self.vertices.len() as u32 {
            if let IdVertex::Psm { .. } = self.vertices[v as usize] {
                let mut parents = self.adjacency[v as usize].clone();
                parents.sort_unstable();
                if !parents.is_empty() {
                    by_parents.entry(parents).or_default().push(v);
                }
            }
        }
        let num_peptide_groups = by_parents.len();
        for (parents, psms) in by_parents.into_iter().sorted() {
            let group = self.add_vertex(IdVertex::PeptideGroup { posterior: 0.0 });
            for &p in &parents {
                self.adjacency[p as usize].retain(|x| psms.binary_search(x).is_err());
                self.add_edge(p, group);
            }
            for &psm in &psms {
                self.adjacency[psm as usize].clear();
                self.add_edge(group, psm);
            }
        }

        // protein groups: proteins keyed by their peptide-group set
        let mut by_peptides: FnvHashMap<Vec<u32>, Vec<u32>> = FnvHashMap::default();
        for v in 0..self.vertices.len() as u32 {
            if let IdVertex::Protein { .. } = self.vertices[v as usize] {
                let mut peptides = self.adjacency[v as usize].clone();
                peptides.sort_unstable();
                if !peptides.is_empty() {
                    by_peptides.entry(peptides).or_default().push(v);
                }
            }
        }
        let mut num_protein_groups = 0usize;
        for (peptides, members) in by_peptides.into_iter().sorted() {
            if members.len() < 2 {
                continue;
            }
            num_protein_groups += 1;
            let group = self.add_vertex(IdVertex::ProteinGroup { posterior: 0.0 });
            for &p in &members {
                self.adjacency[p as usize].clear();
                self.add_edge(p, group);
            }
            for &peptide_group in &peptides {
                self.adjacency[peptide_group as usize]
                    .retain(|x| members.binary_search(x).is_err());
                self.add_edge(group, peptide_group);
            }
        }

        self.compute_connected_components();
        info!(
            "clustered {} peptide groups and {} indistinguishable protein groups in {:?}ms",
            num_peptide_groups,
            num_protein_groups,
            start.elapsed().as_millis()
        );
    }

    /// Applies a functor to every connected component in parallel and
    /// writes the collected posteriors back. Functors must be reentrant;
    /// they receive a read-only component view and return updates instead
    /// of mutating shared state, which keeps the parallel section free of
    /// locks.
    pub fn apply_functor_on_ccs<F>(
        &mut self,
        prots: &mut ProteinIdentification,
        peps: &mut [PeptideIdentification],
        functor: F,
    ) where
        F: Fn(CcView<'_>) -> Vec<PosteriorUpdate> + Sync,
    {
        let start = Instant::now();
        let updates: Vec<PosteriorUpdate> = {
            let graph = &*self;
            let prots_view = &*prots;
            let peps_view = &*peps;
            (0..graph.ccs.len())
                .into_par_iter()
                .flat_map_iter(|cc_index| {
                    functor(CcView {
                        graph,
                        cc_index,
                        prots: prots_view,
                        peps: peps_view,
                    })
                })
                .collect()
        };
        let count = updates.len();
        self.apply_updates(updates, prots, peps);
        info!(
            "applied {} posterior updates across {} connected components in {:?}ms",
            count,
            self.ccs.len(),
            start.elapsed().as_millis()
        );
    }

    /// Single-threaded variant; component outputs are collected in
    /// component iteration order.
    pub fn apply_functor_on_ccs_st<T>(
        &self,
        prots: &ProteinIdentification,
        peps: &[PeptideIdentification],
        mut functor: impl FnMut(CcView<'_>) -> Vec<T>,
    ) -> Vec<T> {
        (0..self.ccs.len())
            .flat_map(|cc_index| {
                functor(CcView {
                    graph: self,
                    cc_index,
                    prots,
                    peps,
                })
            })
            .collect()
    }

    pub fn apply_updates(
        &mut self,
        updates: Vec<PosteriorUpdate>,
        prots: &mut ProteinIdentification,
        peps: &mut [PeptideIdentification],
    ) {
        for update in updates {
            match update {
                PosteriorUpdate::ProteinScore { hit, posterior } => {
                    prots.hits[hit].score = posterior;
                }
                PosteriorUpdate::PsmScore { id, hit, posterior } => {
                    peps[id].hits[hit].score = posterior;
                }
                PosteriorUpdate::GroupPosterior { vertex, posterior } => {
                    match &mut self.vertices[vertex as usize] {
                        IdVertex::ProteinGroup { posterior: p }
                        | IdVertex::PeptideGroup { posterior: p } => *p = posterior,
                        other => {
                            warn!("group posterior addressed a {:?}; dropping it", other.which())
                        }
                    }
                }
            }
        }
    }
}

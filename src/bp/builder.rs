//! Accumulates factor dependencies and materializes the bipartite inference
//! graph with its Bethe cluster regions.

use fnv::FnvHashMap;

use crate::pmf::{TableFactor, Var};

/// Collects `insert_dependency` calls and hands its scratch off to the
/// finished [`InferenceGraph`]. `to_graph` consumes the builder, so the
/// scratch is released on every exit path, including early error returns
/// that never reach it.
#[derive(Default)]
pub struct BetheGraphBuilder {
    factors: Vec<TableFactor>,
    vars: Vec<Var>,
    var_index: FnvHashMap<Var, usize>,
}

/// A directed message edge between a factor node and a variable node.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
}

/// Bipartite factor/variable graph with the Bethe region decomposition:
/// every factor is a region with counting number 1, every variable a region
/// with counting number 1 - degree. Nodes `0..num_factors()` are factors,
/// the rest are variables.
pub struct InferenceGraph {
    factors: Vec<TableFactor>,
    vars: Vec<Var>,
    var_index: FnvHashMap<Var, usize>,
    /// Variable index per factor, aligned with the factor's variable order
    factor_vars: Vec<Vec<usize>>,
    /// Edge id of factor -> variable, aligned with `factor_vars`
    factor_out_edges: Vec<Vec<usize>>,
    counting_numbers: Vec<i64>,
    edges: Vec<Edge>,
    out_edges: Vec<Vec<usize>>,
    reverse: Vec<usize>,
}

impl BetheGraphBuilder {
    /// Registers a factor node and its incident variables, deduplicating
    /// variables by id.
    pub fn insert_dependency(&mut self, factor: TableFactor) {
        for &v in &factor.vars {
            if !self.var_index.contains_key(&v) {
                self.var_index.insert(v, self.vars.len());
                self.vars.push(v);
            }
        }
        self.factors.push(factor);
    }

    pub fn insert_dependencies(&mut self, factors: impl IntoIterator<Item = TableFactor>) {
        for f in factors {
            self.insert_dependency(f);
        }
    }

    /// Materializes the bipartite graph, the directed message edges and the
    /// Bethe counting numbers, consuming the builder.
    pub fn to_graph(self) -> InferenceGraph {
        let num_factors = self.factors.len();
        let num_vars = self.vars.len();

        let factor_vars: Vec<Vec<usize>> = self
            .factors
            .iter()
            .map(|f| f.vars.iter().map(|v| self.var_index[v]).collect())
            .collect();

        let mut edges = Vec::new();
        let mut reverse = Vec::new();
        let mut out_edges = vec![Vec::new(); num_factors + num_vars];
        let mut factor_out_edges = vec![Vec::new(); num_factors];
        let mut degree = vec![0i64; num_vars];

        for (f, vars) in factor_vars.iter().enumerate() {
            for &vi in vars {
                let var_node = num_factors + vi;
                let fwd = edges.len();
                edges.push(Edge {
                    from: f,
                    to: var_node,
                });
                edges.push(Edge {
                    from: var_node,
                    to: f,
                });
                reverse.push(fwd + 1);
                reverse.push(fwd);
                out_edges[f].push(fwd);
                out_edges[var_node].push(fwd + 1);
                factor_out_edges[f].push(fwd);
                degree[vi] += 1;
            }
        }

        let counting_numbers = degree.into_iter().map(|d| 1 - d).collect();

        InferenceGraph {
            factors: self.factors,
            vars: self.vars,
            var_index: self.var_index,
            factor_vars,
            factor_out_edges,
            counting_numbers,
            edges,
            out_edges,
            reverse,
        }
    }
}

impl InferenceGraph {
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.factors.len() + self.vars.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_factor_node(&self, node: usize) -> bool {
        node < self.factors.len()
    }

    pub fn factor(&self, node: usize) -> &TableFactor {
        &self.factors[node]
    }

    pub fn var_node(&self, v: Var) -> Option<usize> {
        self.var_index.get(&v).map(|&i| self.factors.len() + i)
    }

    pub fn edge(&self, e: usize) -> Edge {
        self.edges[e]
    }

    pub fn reverse(&self, e: usize) -> usize {
        self.reverse[e]
    }

    pub fn out_edges(&self, node: usize) -> &[usize] {
        &self.out_edges[node]
    }

    /// Variable indices incident to a factor, in the factor's variable order
    pub fn factor_var_positions(&self, f: usize) -> &[usize] {
        &self.factor_vars[f]
    }

    /// Edge ids of factor -> variable, aligned with the factor's variable order
    pub fn factor_edges(&self, f: usize) -> &[usize] {
        &self.factor_out_edges[f]
    }

    /// Bethe counting number of a variable region (1 - degree)
    pub fn counting_number(&self, var: usize) -> i64 {
        self.counting_numbers[var]
    }
}

//! Probability mass functions and factor tables over Boolean variables.

use crate::error::InferenceError;

/// A variable in the factor graph. `Node` variables correspond to
/// identification-graph vertices; `Aux` variables are internal to the
/// convergecast decomposition of large probabilistic-adder factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    Node(u32),
    Aux(u32),
}

/// A probability mass function as a support range and a table: value `v` has
/// probability `table[v - first_support]`, zero outside the support.
#[derive(Debug, Clone, PartialEq)]
pub struct Pmf {
    pub first_support: i64,
    pub table: Vec<f64>,
}

impl Pmf {
    pub fn binary(p0: f64, p1: f64) -> Self {
        Self {
            first_support: 0,
            table: vec![p0, p1],
        }
    }

    pub fn last_support(&self) -> i64 {
        self.first_support + self.table.len() as i64 - 1
    }

    /// Normalize to sum 1. All-zero or non-finite tables are numeric errors.
    pub fn normalize(&mut self) -> Result<(), InferenceError> {
        let sum: f64 = self.table.iter().sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(InferenceError::Numeric(format!(
                "cannot normalize mass function with total {}",
                sum
            )));
        }
        for p in &mut self.table {
            *p /= sum;
        }
        Ok(())
    }

    /// Probability of presence, read off the support range: if 0 is inside
    /// the support the result is `1 - P(0)`, otherwise `P(1)` if 1 is inside
    /// the support, otherwise 0. Branching on the support rather than on the
    /// vertex kind keeps extraction consistent for multi-valued group
    /// factors whose support does not start at 0.
    pub fn p_present(&self) -> f64 {
        if self.first_support <= 0 && 0 <= self.last_support() {
            1.0 - self.table[(0 - self.first_support) as usize]
        } else if self.first_support <= 1 && 1 <= self.last_support() {
            self.table[(1 - self.first_support) as usize]
        } else {
            0.0
        }
    }
}

/// Pool a sequence of non-negative terms under a p-norm: `p = 1` sums
/// (sum-product), `p = inf` takes the maximum (max-product), intermediate
/// values interpolate.
pub fn p_norm_pool(terms: impl Iterator<Item = f64>, p: f64) -> f64 {
    if p.is_infinite() {
        terms.fold(0.0, f64::max)
    } else if (p - 1.0).abs() < f64::EPSILON {
        terms.sum()
    } else {
        terms.map(|t| t.powf(p)).sum::<f64>().powf(1.0 / p)
    }
}

/// A factor over a tuple of Boolean variables. `table` covers the product
/// domain; bit `i` of the table index is the value of `vars[i]`.
#[derive(Debug, Clone)]
pub struct TableFactor {
    pub vars: Vec<Var>,
    pub table: Vec<f64>,
}

impl TableFactor {
    pub fn new(vars: Vec<Var>, table: Vec<f64>) -> Self {
        debug_assert_eq!(table.len(), 1 << vars.len());
        Self { vars, table }
    }

    pub fn arity(&self) -> usize {
        self.vars.len()
    }

    /// Message to `vars[target]`: for each target value, pool the factor
    /// entries weighted by the incoming messages of the other variables.
    /// `incoming[i]` is the message from `vars[i]`; `incoming[target]` is
    /// ignored.
    pub fn message_to(&self, target: usize, incoming: &[[f64; 2]], p: f64) -> [f64; 2] {
        let n = self.vars.len();
        let mut out = [0.0f64; 2];
        for (x, slot) in out.iter_mut().enumerate() {
            let terms = (0..self.table.len())
                .filter(|cfg| (cfg >> target) & 1 == x)
                .map(|cfg| {
                    let mut term = self.table[cfg];
                    for i in (0..n).filter(|&i| i != target) {
                        term *= incoming[i][(cfg >> i) & 1];
                    }
                    term
                });
            *slot = p_norm_pool(terms, p);
        }
        out
    }
}

//! Loopy belief propagation: factor-graph assembly, message scheduling and
//! marginal extraction.

pub mod builder;
pub mod engine;
pub mod scheduler;

pub use builder::{BetheGraphBuilder, InferenceGraph};
pub use engine::{BeliefPropagationEngine, Marginal};
pub use scheduler::{PropagationState, ScheduleStats, Scheduler};

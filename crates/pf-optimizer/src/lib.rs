//! # pf-optimizer
//!
//! Candidate evaluation and parameter search for PatternForge.
//!
//! Provides the performance evaluator, the search strategies (genetic,
//! random, simplified bayesian, numerical gradient) and the optimizer that
//! wraps a strategy run in a recorded session and saves the winner as a new
//! version.

mod evaluator;
mod optimizer;
mod search;
mod trial;

pub use evaluator::{panic_message, EvaluatorConfig, PerformanceEvaluator};
pub use optimizer::{Optimizer, RunControl};
pub use search::{
    sample_around, strategy_for, BayesianSearch, GeneticSearch, GradientSearch, ProgressFn,
    RandomSearch, SearchContext, SearchStrategy, BAYESIAN_WARMUP, GENETIC_MIN_GENERATIONS,
    GRADIENT_BOUNDS,
};
pub use trial::{improvement_percentage, OptimizationConfig, OptimizationResult, Trial};

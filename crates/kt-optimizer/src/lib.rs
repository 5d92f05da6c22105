//! # kt-optimizer
//!
//! Driver side of kalman-tune.
//!
//! Provides the covariance search space, parameter sweep strategies (grid,
//! random, Bayesian-style perturbation), trial bookkeeping, a shared
//! append-only trial journal and the driver loop that feeds samples to an
//! [`Objective`] with bounded concurrency.

mod driver;
mod search;
mod store;
mod trial;

pub use driver::{Driver, Objective};
pub use search::{
    build_strategy, covariance_search_space, BayesianSearch, GridSearch, ParameterDef,
    ParameterKind, RandomSearch, SearchSpace, SearchStrategy,
};
pub use store::{JournalStore, MemoryStore, TrialStore};
pub use trial::{
    ObjectiveDirection, OptimizationConfig, OptimizationState, OptimizationStatus, Trial,
    TrialStatus,
};

//! Objective evaluation core: one call runs one trial of the simulation
//! under test and scores the estimator's final state.

pub mod identifier;
pub mod loss;
pub mod materialize;
pub mod objective;
pub mod parser;
pub mod runner;

pub use identifier::{TrialId, Workspace, WorkspaceAllocator};
pub use loss::loss;
pub use materialize::ConfigMaterializer;
pub use objective::ObjectiveEvaluator;
pub use parser::parse_final_state;
pub use runner::TrialRunner;

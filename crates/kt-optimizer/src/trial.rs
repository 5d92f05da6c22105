//! Trial tracking and optimization run management.

use chrono::{DateTime, Utc};
use kt_types::{EvaluationResult, ParamSample};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::{covariance_search_space, SearchSpace};

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    #[default]
    Minimize,
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Experiment name; also names the trial journal.
    pub experiment: String,

    /// Key separating independent searches that share one journal.
    pub exp_key: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Which search strategy to use: "grid", "random", or "bayesian".
    pub strategy: String,

    /// Total number of trials the experiment should hold.
    pub max_trials: usize,

    /// How many trials to run in parallel.
    pub concurrency: usize,

    pub direction: ObjectiveDirection,

    /// Exploration weight for Bayesian search (ignored for grid/random).
    pub exploration_weight: f64,

    /// Number of steps per dimension for grid search.
    pub grid_steps: usize,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(experiment: impl Into<String>, search_space: SearchSpace, strategy: &str) -> Self {
        Self {
            experiment: experiment.into(),
            exp_key: "kalman".to_string(),
            search_space,
            strategy: strategy.to_string(),
            max_trials: 100,
            concurrency: 1,
            direction: ObjectiveDirection::Minimize,
            exploration_weight: 0.3,
            grid_steps: 3,
            created_at: Utc::now(),
        }
    }

    /// Six-dimensional covariance search with the given strategy.
    pub fn covariance(experiment: impl Into<String>, strategy: &str) -> Self {
        Self::new(experiment, covariance_search_space(), strategy)
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_exp_key(mut self, key: impl Into<String>) -> Self {
        self.exp_key = key.into();
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub trials_running: usize,
    pub best_trial: Option<Trial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            state: OptimizationState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            trials_running: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn trials_finished(&self) -> usize {
        self.trials_completed + self.trials_failed
    }

    /// Fold a finished trial into the counters and the best-trial slot.
    pub fn record(&mut self, trial: &Trial) {
        match trial.status {
            TrialStatus::Completed => self.trials_completed += 1,
            TrialStatus::Failed => self.trials_failed += 1,
            TrialStatus::Pending | TrialStatus::Running => return,
        }
        self.update_best(trial);
    }

    /// Update the best trial if `trial` improves on the current best.
    /// Only successful trials with a loss qualify.
    pub fn update_best(&mut self, trial: &Trial) {
        let Some(objective) = trial.objective() else {
            return;
        };
        let improves = match self.best_trial.as_ref().and_then(Trial::objective) {
            None => true,
            Some(current_best) => match self.config.direction {
                ObjectiveDirection::Maximize => objective > current_best,
                ObjectiveDirection::Minimize => objective < current_best,
            },
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one sample evaluated by the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub experiment: String,
    pub exp_key: String,
    pub trial_number: usize,
    /// Raw values drawn by the strategy, before any transform.
    pub sample: ParamSample,
    pub status: TrialStatus,
    pub result: Option<EvaluationResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(config: &OptimizationConfig, trial_number: usize, sample: ParamSample) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment: config.experiment.clone(),
            exp_key: config.exp_key.clone(),
            trial_number,
            sample,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    /// Attach the evaluation result. A failed evaluation marks the trial
    /// failed but keeps the result for auditing.
    pub fn finish(&mut self, result: EvaluationResult) {
        self.finished_at = Some(Utc::now());
        if result.is_success() {
            self.status = TrialStatus::Completed;
        } else {
            self.status = TrialStatus::Failed;
            self.error = result.error.clone();
        }
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Loss of a successful trial.
    pub fn objective(&self) -> Option<f64> {
        self.result.as_ref().and_then(EvaluationResult::objective)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

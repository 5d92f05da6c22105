//! The objective evaluated by the optimization driver.
//!
//! One call allocates a workspace, writes the trial config, runs the
//! simulation and scores its final state. Problems inside the simulation
//! come back as a failed [`EvaluationResult`]; only setup problems (bad
//! template, no free workspace) are returned as errors.

use async_trait::async_trait;
use chrono::Utc;
use kt_optimizer::Objective;
use kt_types::{
    CovarianceParams, EvaluationResult, EvaluationStatus, EvaluatorConfig, KtResult, ParamSample,
    RunnerError, TrialState,
};
use tracing::{debug, info, warn};

use crate::identifier::{Workspace, WorkspaceAllocator};
use crate::loss::loss;
use crate::materialize::ConfigMaterializer;
use crate::parser::parse_final_state;
use crate::runner::TrialRunner;

#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    config: EvaluatorConfig,
    allocator: WorkspaceAllocator,
    materializer: ConfigMaterializer,
    runner: TrialRunner,
}

impl ObjectiveEvaluator {
    pub fn new(config: EvaluatorConfig) -> KtResult<Self> {
        config.validate()?;
        Ok(Self {
            allocator: WorkspaceAllocator::new(&config.results_root, config.max_allocation_attempts),
            materializer: ConfigMaterializer::new(config.section.clone()),
            runner: TrialRunner::new(config.runner.clone(), config.scenario.clone()),
            config,
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate raw strategy samples; each passes through the reciprocal
    /// transform before reaching the filter config.
    pub async fn evaluate_sampled(&self, sample: &ParamSample) -> KtResult<EvaluationResult> {
        let params = CovarianceParams::from_sampled(sample)?;
        self.evaluate(&params).await
    }

    /// Run one trial with the given covariances.
    pub async fn evaluate(&self, params: &CovarianceParams) -> KtResult<EvaluationResult> {
        let workspace = self.allocator.allocate()?;
        transition(&workspace, TrialState::Allocated);
        info!("Start trial with number: {}", workspace.id);

        let config_path =
            self.materializer
                .materialize(&self.config.scenario.config_template, params, &workspace)?;
        transition(&workspace, TrialState::Configured);

        transition(&workspace, TrialState::Running);
        let run = self.runner.run(&workspace, &config_path).await;
        let runner_failure = match &run {
            Ok(()) => {
                info!("Trial {} successful!", workspace.id);
                None
            }
            Err(e) => {
                warn!("Trial {} failed: {}", workspace.id, e);
                Some(match e {
                    RunnerError::Timeout { .. } => TrialState::TimedOut,
                    _ => TrialState::RunnerFailed,
                })
            }
        };

        // The log is read even after a runner failure so the result still
        // carries whatever final state the estimator reached.
        let log_path = workspace.log_path();
        let parsed = parse_final_state(&log_path);
        let (record, loss_value, parse_error) = match parsed {
            Ok(record) => {
                transition(&workspace, TrialState::Parsed);
                let value = loss(&record, &self.config.norms)?;
                info!("Loss is: {}", value);
                (Some(record), Some(value), None)
            }
            Err(e) => {
                warn!("Trial {} produced no usable final state: {}", workspace.id, e);
                (None, None, Some(e))
            }
        };

        let (state, status, error) = match (run, parse_error) {
            (Ok(()), None) => (TrialState::Scored, EvaluationStatus::Success, None),
            (Ok(()), Some(e)) => (TrialState::ParseFailed, EvaluationStatus::Failure, Some(e.to_string())),
            (Err(e), _) => (
                runner_failure.unwrap_or(TrialState::RunnerFailed),
                EvaluationStatus::Failure,
                Some(e.to_string()),
            ),
        };
        transition(&workspace, state);

        Ok(EvaluationResult {
            trial_id: workspace.id.to_string(),
            loss: loss_value,
            status,
            state,
            eval_time: Utc::now(),
            log_path: workspace.path.clone(),
            pose: record.map(|r| r.pose()),
            pose_cov: record.map(|r| r.pose_covariance()),
            params: *params,
            norms: self.config.norms,
            error,
        })
    }
}

fn transition(workspace: &Workspace, state: TrialState) {
    debug!("Trial {} -> {}", workspace.id, state);
}

#[async_trait]
impl Objective for ObjectiveEvaluator {
    async fn evaluate(&self, sample: &ParamSample) -> KtResult<EvaluationResult> {
        self.evaluate_sampled(sample).await
    }
}

//! Driver loop: pull samples from a strategy, evaluate them with bounded
//! concurrency and record every finished trial in the shared store.

use async_trait::async_trait;
use kt_types::{EvaluationResult, KtError, KtResult, ParamSample};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::search::SearchStrategy;
use crate::store::TrialStore;
use crate::trial::{OptimizationConfig, OptimizationStatus, Trial};

/// The function being minimized.
///
/// Implementations must not rely on state shared with other evaluations:
/// each call receives everything it needs through `self` and `sample`.
/// Failed trials are returned as `Ok` results with a failure status; `Err`
/// aborts the whole run.
#[async_trait]
pub trait Objective: Send + Sync {
    async fn evaluate(&self, sample: &ParamSample) -> KtResult<EvaluationResult>;
}

type Finished = (Trial, KtResult<EvaluationResult>);

pub struct Driver {
    config: OptimizationConfig,
    strategy: Box<dyn SearchStrategy>,
    store: Arc<dyn TrialStore>,
    seen: HashSet<Uuid>,
    /// How far into the store this driver has read.
    position: u64,
}

impl Driver {
    pub fn new(
        config: OptimizationConfig,
        strategy: Box<dyn SearchStrategy>,
        store: Arc<dyn TrialStore>,
    ) -> Self {
        Self {
            config,
            strategy,
            store,
            seen: HashSet::new(),
            position: 0,
        }
    }

    /// Run until the experiment holds `max_trials` finished trials.
    ///
    /// Trials already in the store (from an earlier run or from another
    /// process sharing it) count toward the total and are reported to the
    /// strategy before it is asked for new samples.
    pub async fn run(&mut self, objective: Arc<dyn Objective>) -> KtResult<OptimizationStatus> {
        let mut status = OptimizationStatus::new(self.config.clone());
        status.mark_running();
        info!(
            "Starting experiment '{}' ({}): {} trials, {} workers, strategy {}",
            self.config.experiment,
            self.config.exp_key,
            self.config.max_trials,
            self.config.concurrency,
            self.strategy.name()
        );

        let worker = format!("pid-{}", std::process::id());
        let mut in_flight: JoinSet<Finished> = JoinSet::new();

        loop {
            if let Err(e) = self.sync_history(&mut status).await {
                return Err(Self::abort(&mut in_flight, &mut status, e));
            }

            let mut exhausted = false;
            while in_flight.len() < self.config.concurrency
                && self.seen.len() + in_flight.len() < self.config.max_trials
            {
                let Some(sample) = self.strategy.suggest(1).pop() else {
                    exhausted = true;
                    break;
                };
                let mut trial = Trial::new(&self.config, self.seen.len() + in_flight.len(), sample);
                trial.mark_running(Some(worker.clone()));

                let objective = Arc::clone(&objective);
                in_flight.spawn(async move {
                    let outcome = objective.evaluate(&trial.sample).await;
                    (trial, outcome)
                });
            }
            status.trials_running = in_flight.len();
            if exhausted && in_flight.is_empty() {
                info!("Strategy {} has no more samples", self.strategy.name());
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (mut trial, outcome) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    let e = KtError::Internal(format!("evaluation task failed: {e}"));
                    return Err(Self::abort(&mut in_flight, &mut status, e));
                }
            };

            match outcome {
                Ok(result) => {
                    trial.finish(result);
                    let store = Arc::clone(&self.store);
                    let record = trial.clone();
                    if let Err(e) = blocking(move || store.append(&record)).await {
                        return Err(Self::abort(&mut in_flight, &mut status, e));
                    }
                    self.observe(&trial, &mut status);
                    match trial.objective() {
                        Some(loss) => info!(
                            "Trial {} finished with loss {:.6} ({}/{})",
                            trial.trial_number,
                            loss,
                            self.seen.len(),
                            self.config.max_trials
                        ),
                        None => warn!(
                            "Trial {} failed: {} ({}/{})",
                            trial.trial_number,
                            trial.error.as_deref().unwrap_or("no usable result"),
                            self.seen.len(),
                            self.config.max_trials
                        ),
                    }
                }
                Err(e) => {
                    trial.mark_failed(e.to_string());
                    error!("Trial {} aborted the run: {}", trial.trial_number, e);
                    return Err(Self::abort(&mut in_flight, &mut status, e));
                }
            }
        }

        status.trials_running = 0;
        status.mark_completed();
        if let Some(best) = status.best_trial.as_ref().and_then(Trial::objective) {
            info!(
                "Experiment '{}' finished: {} completed, {} failed, best loss {:.6}",
                self.config.experiment, status.trials_completed, status.trials_failed, best
            );
        } else {
            info!(
                "Experiment '{}' finished without a successful trial ({} failed)",
                self.config.experiment, status.trials_failed
            );
        }
        Ok(status)
    }

    /// Pick up trials recorded since the last sync by earlier runs, other
    /// processes or this driver.
    async fn sync_history(&mut self, status: &mut OptimizationStatus) -> KtResult<()> {
        let store = Arc::clone(&self.store);
        let exp_key = self.config.exp_key.clone();
        let position = self.position;
        let (history, position) = blocking(move || store.load_from(&exp_key, position)).await?;
        self.position = position;
        let mut picked_up = 0;
        for trial in history {
            if !self.seen.contains(&trial.id) {
                self.observe(&trial, status);
                picked_up += 1;
            }
        }
        if picked_up > 0 {
            info!("Picked up {} trials from the store", picked_up);
        }
        Ok(())
    }

    fn observe(&mut self, trial: &Trial, status: &mut OptimizationStatus) {
        self.seen.insert(trial.id);
        self.strategy.report(&trial.sample, trial.objective());
        status.record(trial);
    }

    fn abort(
        in_flight: &mut JoinSet<Finished>,
        status: &mut OptimizationStatus,
        error: KtError,
    ) -> KtError {
        in_flight.abort_all();
        status.trials_running = 0;
        status.mark_failed(error.to_string());
        error
    }
}

/// Run store I/O on the blocking pool.
async fn blocking<T, F>(f: F) -> KtResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> KtResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KtError::Internal(format!("store task failed: {e}")))?
}

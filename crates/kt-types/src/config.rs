//! Evaluator settings.
//!
//! Everything an evaluation needs is carried in [`EvaluatorConfig`] and
//! handed to the evaluator explicitly, so a freshly started worker process
//! can rebuild it from the settings file alone.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{KtError, KtResult};
use crate::records::Norms;

/// Fixed inputs of the scenario under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPaths {
    /// Baseline filter configuration overlaid per trial.
    pub config_template: PathBuf,
    /// Recorded sensor input replayed by the runner.
    pub recording: PathBuf,
    /// Launch descriptor for the scenario.
    pub launch: PathBuf,
    /// Workspace root of the system under test.
    pub workspace_root: PathBuf,
}

/// How the trial runner executable is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub executable: PathBuf,
    /// Optional interpreter the executable is passed to, e.g. `/bin/sh`.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    /// Passed to the runner as `--timeout`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Extra wall-clock time granted before the runner is killed.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
}

impl RunnerSettings {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            interpreter: None,
            timeout_seconds: default_timeout_seconds(),
            kill_grace_seconds: default_kill_grace_seconds(),
        }
    }

    /// Hard wall-clock limit after which the runner process is killed.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.saturating_add(self.kill_grace_seconds))
    }
}

/// Settings injected into the objective evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Directory holding one workspace per trial.
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
    pub scenario: ScenarioPaths,
    pub runner: RunnerSettings,
    /// Section of the filter config holding the covariance leaves.
    #[serde(default = "default_section")]
    pub section: String,
    #[serde(default)]
    pub norms: Norms,
    #[serde(default = "default_max_allocation_attempts")]
    pub max_allocation_attempts: u32,
}

fn default_results_root() -> PathBuf {
    PathBuf::from("/data/KalmanTuningLogs")
}

fn default_section() -> String {
    "kalman_cov".to_string()
}

fn default_timeout_seconds() -> u64 {
    20
}

fn default_kill_grace_seconds() -> u64 {
    5
}

fn default_max_allocation_attempts() -> u32 {
    16
}

impl EvaluatorConfig {
    pub fn new(scenario: ScenarioPaths, runner: RunnerSettings) -> Self {
        Self {
            results_root: default_results_root(),
            scenario,
            runner,
            section: default_section(),
            norms: Norms::default(),
            max_allocation_attempts: default_max_allocation_attempts(),
        }
    }

    pub fn with_results_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.results_root = root.into();
        self
    }

    pub fn with_norms(mut self, norms: Norms) -> Self {
        self.norms = norms;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64, kill_grace_seconds: u64) -> Self {
        self.runner.timeout_seconds = timeout_seconds;
        self.runner.kill_grace_seconds = kill_grace_seconds;
        self
    }

    /// Load settings from a YAML file.
    pub fn from_yaml_file(path: &Path) -> KtResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KtError::Settings(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> KtResult<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| KtError::Settings(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KtResult<()> {
        self.norms.validate()?;
        if self.runner.timeout_seconds == 0 {
            return Err(KtError::Settings("runner timeout must be at least one second".into()));
        }
        if self.max_allocation_attempts == 0 {
            return Err(KtError::Settings("max_allocation_attempts must be positive".into()));
        }
        if self.section.is_empty() {
            return Err(KtError::Settings("config section name is empty".into()));
        }
        Ok(())
    }
}

//! Final-state records parsed from trial logs and the per-trial evaluation
//! result handed back to the optimization driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::LossError;
use crate::params::CovarianceParams;

/// The estimator's state on the last row of a trial log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalStateRecord {
    pub x_end: f64,
    pub y_end: f64,
    pub theta_end: f64,
    pub x_var_end: f64,
    pub y_var_end: f64,
    pub theta_var_end: f64,
}

impl FinalStateRecord {
    pub fn pose(&self) -> Pose {
        Pose {
            x_end: self.x_end,
            y_end: self.y_end,
            theta_end: self.theta_end,
        }
    }

    pub fn pose_covariance(&self) -> PoseCovariance {
        PoseCovariance {
            x_var_end: self.x_var_end,
            y_var_end: self.y_var_end,
            theta_var_end: self.theta_var_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x_end: f64,
    pub y_end: f64,
    pub theta_end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseCovariance {
    pub x_var_end: f64,
    pub y_var_end: f64,
    pub theta_var_end: f64,
}

/// Normalization constants dividing each loss component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Norms {
    /// meters
    pub x: f64,
    /// meters
    pub y: f64,
    /// radians
    pub theta: f64,
    pub x_var: f64,
    pub y_var: f64,
    pub theta_var: f64,
}

impl Default for Norms {
    fn default() -> Self {
        Self {
            x: 0.1,
            y: 0.1,
            theta: 0.1,
            x_var: 1.0,
            y_var: 1.0,
            theta_var: 0.34,
        }
    }
}

impl Norms {
    /// A norm of 1.0 for every component.
    pub fn unit() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            theta: 1.0,
            x_var: 1.0,
            y_var: 1.0,
            theta_var: 1.0,
        }
    }

    pub fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("x", self.x),
            ("y", self.y),
            ("theta", self.theta),
            ("x_var", self.x_var),
            ("y_var", self.y_var),
            ("theta_var", self.theta_var),
        ]
    }

    /// Reject zero or non-finite constants before any division happens.
    pub fn validate(&self) -> Result<(), LossError> {
        for (component, value) in self.named() {
            if value == 0.0 {
                return Err(LossError::ZeroNorm { component });
            }
            if !value.is_finite() {
                return Err(LossError::InvalidNorm { component, value });
            }
        }
        Ok(())
    }
}

/// Outcome reported to the driver. A failed trial is still a valid result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Success,
    Failure,
}

/// Lifecycle of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Allocated,
    Configured,
    Running,
    Parsed,
    TimedOut,
    RunnerFailed,
    Scored,
    ParseFailed,
}

impl TrialState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrialState::Scored | TrialState::ParseFailed | TrialState::TimedOut | TrialState::RunnerFailed
        )
    }
}

impl std::fmt::Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrialState::Allocated => "allocated",
            TrialState::Configured => "configured",
            TrialState::Running => "running",
            TrialState::Parsed => "parsed",
            TrialState::TimedOut => "timed_out",
            TrialState::RunnerFailed => "runner_failed",
            TrialState::Scored => "scored",
            TrialState::ParseFailed => "parse_failed",
        };
        f.write_str(name)
    }
}

/// Structured result of one evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Decimal rendering of the 128-bit trial identifier.
    pub trial_id: String,
    pub loss: Option<f64>,
    pub status: EvaluationStatus,
    pub state: TrialState,
    pub eval_time: DateTime<Utc>,
    pub log_path: PathBuf,
    pub pose: Option<Pose>,
    pub pose_cov: Option<PoseCovariance>,
    pub params: CovarianceParams,
    pub norms: Norms,
    pub error: Option<String>,
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        self.status == EvaluationStatus::Success
    }

    /// Loss usable by a search strategy: only successful trials count.
    pub fn objective(&self) -> Option<f64> {
        if self.is_success() {
            self.loss
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_norms_match_tuning_defaults() {
        let norms = Norms::default();
        assert_eq!(norms.x, 0.1);
        assert_eq!(norms.y, 0.1);
        assert_eq!(norms.theta, 0.1);
        assert_eq!(norms.x_var, 1.0);
        assert_eq!(norms.y_var, 1.0);
        assert_eq!(norms.theta_var, 0.34);
        assert!(norms.validate().is_ok());
    }

    #[test]
    fn zero_norm_is_rejected() {
        let norms = Norms {
            y_var: 0.0,
            ..Norms::default()
        };
        assert_eq!(norms.validate(), Err(LossError::ZeroNorm { component: "y_var" }));

        let norms = Norms {
            theta: f64::INFINITY,
            ..Norms::default()
        };
        assert!(matches!(norms.validate(), Err(LossError::InvalidNorm { component: "theta", .. })));
    }

    #[test]
    fn result_serializes_in_driver_shape() {
        let record = FinalStateRecord {
            x_end: 0.5,
            y_end: -0.25,
            theta_end: 0.1,
            x_var_end: 0.01,
            y_var_end: 0.02,
            theta_var_end: 0.03,
        };
        let result = EvaluationResult {
            trial_id: "42".to_string(),
            loss: Some(1.5),
            status: EvaluationStatus::Success,
            state: TrialState::Scored,
            eval_time: Utc::now(),
            log_path: PathBuf::from("/data/KalmanTuningLogs/42"),
            pose: Some(record.pose()),
            pose_cov: Some(record.pose_covariance()),
            params: CovarianceParams::new(1.0, 1.0, 1.0, 1.0, 1.0, 1.0).unwrap(),
            norms: Norms::default(),
            error: None,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["state"], "scored");
        assert_eq!(value["pose"]["y_end"], -0.25);
        assert_eq!(value["pose_cov"]["theta_var_end"], 0.03);
        assert_eq!(value["params"]["omega"], 1.0);
        assert_eq!(value["norms"]["theta_var"], 0.34);

        let back: EvaluationResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn failed_trials_have_no_objective() {
        let result = EvaluationResult {
            trial_id: "7".to_string(),
            loss: Some(3.0),
            status: EvaluationStatus::Failure,
            state: TrialState::RunnerFailed,
            eval_time: Utc::now(),
            log_path: PathBuf::from("/tmp/7"),
            pose: None,
            pose_cov: None,
            params: CovarianceParams::new(1.0, 1.0, 1.0, 1.0, 1.0, 1.0).unwrap(),
            norms: Norms::default(),
            error: Some("Trial runner exited with status 1".to_string()),
        };
        assert_eq!(result.objective(), None);
        assert!(result.state.is_terminal());
        assert!(!TrialState::Running.is_terminal());
    }
}

//! Candidate covariance parameters and the reciprocal sampling transform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ParamError;

/// Raw values drawn by a search strategy, keyed by parameter name.
pub type ParamSample = BTreeMap<String, f64>;

/// Names of the six tuned process-noise terms, in config order.
pub const PARAM_NAMES: [&str; 6] = ["x", "y", "a", "v", "theta", "omega"];

/// Presents a sampled magnitude to the simulation as its reciprocal.
///
/// The search space is log-uniform over the inverse of each covariance, so
/// every sampled value passes through this before it reaches the filter.
/// Zero is rejected rather than clamped.
pub fn reciprocal(name: &str, sample: f64) -> Result<f64, ParamError> {
    if !sample.is_finite() {
        return Err(ParamError::NonFinite {
            name: name.to_string(),
            value: sample,
        });
    }
    if sample == 0.0 {
        return Err(ParamError::ZeroSample {
            name: name.to_string(),
        });
    }
    Ok(1.0 / sample)
}

/// The six process-noise variances written into the filter config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovarianceParams {
    pub x: f64,
    pub y: f64,
    pub a: f64,
    pub v: f64,
    pub theta: f64,
    pub omega: f64,
}

impl CovarianceParams {
    /// Build from covariance values directly. Every value must be finite and
    /// strictly positive.
    pub fn new(x: f64, y: f64, a: f64, v: f64, theta: f64, omega: f64) -> Result<Self, ParamError> {
        let params = Self {
            x,
            y,
            a,
            v,
            theta,
            omega,
        };
        params.validate()?;
        Ok(params)
    }

    /// Build from named covariance values (no transform applied).
    pub fn from_map(values: &ParamSample) -> Result<Self, ParamError> {
        let [x, y, a, v, theta, omega] = Self::lookup(values, |_, value| Ok(value))?;
        Self::new(x, y, a, v, theta, omega)
    }

    /// Build from raw strategy samples, applying [`reciprocal`] to each.
    pub fn from_sampled(sample: &ParamSample) -> Result<Self, ParamError> {
        let [x, y, a, v, theta, omega] = Self::lookup(sample, reciprocal)?;
        Self::new(x, y, a, v, theta, omega)
    }

    fn lookup<F>(values: &ParamSample, transform: F) -> Result<[f64; 6], ParamError>
    where
        F: Fn(&str, f64) -> Result<f64, ParamError>,
    {
        let mut out = [0.0; 6];
        for (slot, name) in out.iter_mut().zip(PARAM_NAMES) {
            let raw = values.get(name).copied().ok_or_else(|| ParamError::Missing {
                name: name.to_string(),
            })?;
            *slot = transform(name, raw)?;
        }
        Ok(out)
    }

    fn validate(&self) -> Result<(), ParamError> {
        for (name, value) in self.named() {
            if !value.is_finite() {
                return Err(ParamError::NonFinite {
                    name: name.to_string(),
                    value,
                });
            }
            if value <= 0.0 {
                return Err(ParamError::NotPositive {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// `(name, value)` pairs in [`PARAM_NAMES`] order.
    pub fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("x", self.x),
            ("y", self.y),
            ("a", self.a),
            ("v", self.v),
            ("theta", self.theta),
            ("omega", self.omega),
        ]
    }

    /// `(config key, value)` pairs for the filter's covariance section.
    pub fn config_leaves(&self) -> [(&'static str, f64); 6] {
        [
            ("sys_var_x", self.x),
            ("sys_var_y", self.y),
            ("sys_var_a", self.a),
            ("sys_var_v", self.v),
            ("sys_var_theta", self.theta),
            ("sys_var_omega", self.omega),
        ]
    }
}

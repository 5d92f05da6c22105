//! Scoring of the estimator's final state.

use kt_types::{FinalStateRecord, LossError, Norms};

/// Euclidean norm of the six normalized final-state residuals.
///
/// `sqrt(sum((value_i / norm_i)^2))` over x, y, theta and their variances.
/// Zero means perfect, zero-uncertainty tracking. Zero or non-finite norms
/// are rejected before any division.
pub fn loss(record: &FinalStateRecord, norms: &Norms) -> Result<f64, LossError> {
    norms.validate()?;
    let residuals = [
        (record.x_end, norms.x),
        (record.y_end, norms.y),
        (record.theta_end, norms.theta),
        (record.x_var_end, norms.x_var),
        (record.y_var_end, norms.y_var),
        (record.theta_var_end, norms.theta_var),
    ];
    let sum: f64 = residuals
        .iter()
        .map(|(value, norm)| {
            let r = value / norm;
            r * r
        })
        .sum();
    Ok(sum.sqrt())
}

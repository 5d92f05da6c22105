//! Final-state extraction from the trial runner's CSV log.
//!
//! The log has one row per estimator update. Only the last row matters. Its
//! layout is the estimator's odometry serialization: position at columns 1
//! and 2, heading at 6, then the row-major 6x6 pose covariance from column 7
//! on, so the x, y and heading variances sit at 7, 14 and 42.

use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use kt_types::{FinalStateRecord, ParseError};
use std::path::Path;

const COL_X: usize = 1;
const COL_Y: usize = 2;
const COL_THETA: usize = 6;
const COL_X_VAR: usize = 7;
const COL_Y_VAR: usize = 14;
const COL_THETA_VAR: usize = 42;

/// Read the last row of the log at `log_path`.
pub fn parse_final_state(log_path: &Path) -> Result<FinalStateRecord, ParseError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(log_path)
        .map_err(|e| ParseError::LogUnreadable {
            path: log_path.to_path_buf(),
            message: e.to_string(),
        })?;

    // Rows stay raw bytes; only the last one is decoded.
    let mut current = ByteRecord::new();
    let mut last = ByteRecord::new();
    let mut rows = 0usize;
    loop {
        match rdr.read_byte_record(&mut current) {
            Ok(true) => {
                std::mem::swap(&mut current, &mut last);
                rows += 1;
            }
            Ok(false) => break,
            Err(e) => {
                return Err(ParseError::MalformedRow {
                    message: format!("unreadable record after row {rows}: {e}"),
                })
            }
        }
    }

    if rows == 0 {
        return Err(ParseError::EmptyLog {
            path: log_path.to_path_buf(),
        });
    }
    let last = StringRecord::from_byte_record(last).map_err(|e| ParseError::MalformedRow {
        message: format!("last row is not valid UTF-8: {}", e.utf8_error()),
    })?;
    parse_record(&last)
}

/// Extract the final state from one log row.
pub fn parse_record(record: &StringRecord) -> Result<FinalStateRecord, ParseError> {
    if record.len() <= COL_THETA_VAR {
        return Err(ParseError::MalformedRow {
            message: format!(
                "row has {} columns, expected at least {}",
                record.len(),
                COL_THETA_VAR + 1
            ),
        });
    }

    Ok(FinalStateRecord {
        x_end: field(record, COL_X, "x")?,
        y_end: field(record, COL_Y, "y")?,
        theta_end: field(record, COL_THETA, "theta")?,
        x_var_end: field(record, COL_X_VAR, "x_var")?,
        y_var_end: field(record, COL_Y_VAR, "y_var")?,
        theta_var_end: field(record, COL_THETA_VAR, "theta_var")?,
    })
}

fn field(record: &StringRecord, index: usize, name: &str) -> Result<f64, ParseError> {
    let raw = record.get(index).unwrap_or("").trim();
    let value: f64 = raw.parse().map_err(|_| ParseError::MalformedRow {
        message: format!("column {index} ({name}) is not a number: {raw:?}"),
    })?;
    if !value.is_finite() {
        return Err(ParseError::MalformedRow {
            message: format!("column {index} ({name}) is not finite: {raw:?}"),
        });
    }
    Ok(value)
}

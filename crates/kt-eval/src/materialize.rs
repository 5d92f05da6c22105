//! Per-trial filter configuration: the baseline template with the candidate
//! covariances written into one section.

use kt_types::{ConfigError, CovarianceParams};
use serde_yaml::{Mapping, Value};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::identifier::Workspace;

#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    section: String,
}

impl ConfigMaterializer {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
        }
    }

    /// Overlay `params` onto the template at `template_path` and write the
    /// result into the workspace. Returns the written path.
    pub fn materialize(
        &self,
        template_path: &Path,
        params: &CovarianceParams,
        workspace: &Workspace,
    ) -> Result<PathBuf, ConfigError> {
        let mut document = load_template(template_path)?;
        self.overlay(&mut document, params)?;

        let rendered = serde_yaml::to_string(&document).map_err(|e| ConfigError::WriteFailed {
            path: workspace.config_path(),
            message: e.to_string(),
        })?;

        let path = workspace.config_path();
        write_once(&path, rendered.as_bytes())?;
        debug!("Wrote trial config {}", path.display());
        Ok(path)
    }

    /// Replace the six covariance leaves in place; all other keys are left
    /// untouched.
    pub fn overlay(&self, document: &mut Value, params: &CovarianceParams) -> Result<(), ConfigError> {
        let section = document
            .get_mut(self.section.as_str())
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| ConfigError::MissingSection {
                section: self.section.clone(),
            })?;
        overlay_leaves(section, params);
        Ok(())
    }
}

fn overlay_leaves(section: &mut Mapping, params: &CovarianceParams) {
    for (key, value) in params.config_leaves() {
        section.insert(Value::from(key), Value::from(value));
    }
}

fn load_template(path: &Path) -> Result<Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConfigError::TemplateNotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::TemplateUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
    })?;
    serde_yaml::from_str(&text).map_err(|e| ConfigError::TemplateUnparsable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// The trial config is written exactly once; an existing file is an error.
fn write_once(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let write_failed = |e: std::io::Error| ConfigError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(write_failed)?;
    file.write_all(bytes).map_err(write_failed)?;
    file.sync_all().map_err(write_failed)
}

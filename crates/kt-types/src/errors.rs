use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kalman-tune
#[derive(Error, Debug)]
pub enum KtError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Loss error: {0}")]
    Loss(#[from] LossError),

    #[error("Parameter error: {0}")]
    Params(#[from] ParamError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors while materializing the per-trial configuration. Always fatal for
/// the evaluation call.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("Config template {} could not be read: {message}", path.display())]
    TemplateUnreadable { path: PathBuf, message: String },

    #[error("Config template {} is not valid YAML: {message}", path.display())]
    TemplateUnparsable { path: PathBuf, message: String },

    #[error("Config template has no mapping section '{section}'")]
    MissingSection { section: String },

    #[error("Failed to write trial config {}: {message}", path.display())]
    WriteFailed { path: PathBuf, message: String },
}

/// Errors while allocating a trial workspace.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// Another trial owns this path already. Recoverable: retry with a new id.
    #[error("Workspace already exists: {}", path.display())]
    Collision { path: PathBuf },

    #[error("No free trial workspace after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Failed to create workspace {}: {message}", path.display())]
    CreateFailed { path: PathBuf, message: String },
}

impl WorkspaceError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkspaceError::Collision { .. })
    }
}

/// Trial runner outcomes other than a clean exit. None of these abort an
/// evaluation; they turn into a failed trial.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Trial runner timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("Trial runner exited with status {code}")]
    NonZeroExit { code: i32 },

    #[error("Trial runner was terminated by a signal")]
    Terminated,

    #[error("Trial runner could not be started: {message}")]
    Spawn { message: String },
}

/// Errors reading the final state out of the trial's output log.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Trial log {} could not be read: {message}", path.display())]
    LogUnreadable { path: PathBuf, message: String },

    #[error("Trial log {} has no rows", path.display())]
    EmptyLog { path: PathBuf },

    #[error("Malformed final row in trial log: {message}")]
    MalformedRow { message: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum LossError {
    #[error("Normalization constant '{component}' is zero")]
    ZeroNorm { component: &'static str },

    #[error("Normalization constant '{component}' is not finite: {value}")]
    InvalidNorm { component: &'static str, value: f64 },
}

#[derive(Error, Debug, PartialEq)]
pub enum ParamError {
    #[error("Sampled value for '{name}' is zero, reciprocal is undefined")]
    ZeroSample { name: String },

    #[error("Value for '{name}' is not finite: {value}")]
    NonFinite { name: String, value: f64 },

    #[error("Covariance '{name}' must be strictly positive, got {value}")]
    NotPositive { name: String, value: f64 },

    #[error("Missing parameter: {name}")]
    Missing { name: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Trial store {} could not be opened: {message}", path.display())]
    Open { path: PathBuf, message: String },

    #[error("Failed to append to trial store: {message}")]
    Append { message: String },
}

/// Result type alias for kalman-tune operations
pub type KtResult<T> = Result<T, KtError>;

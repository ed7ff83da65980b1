use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration-time and I/O errors.
///
/// These block the operation that raised them (saving a column, loading a
/// workbook). Per-cell evaluation failures are [`EvalError`]s instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl EngineError {
    /// The cycle path when this is a `CyclicDependency` error.
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            EngineError::CyclicDependency { path } => Some(path),
            _ => None,
        }
    }
}

/// Per-cell evaluation failure.
///
/// Stored inside [`crate::core::Value::Error`] so that one malformed row never
/// aborts a batch recompute.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalError {
    #[error("Unknown column: {{{name}}}")]
    UnknownColumn { name: String },

    #[error("Unsupported function: {name}() with {arity} argument(s)")]
    UnsupportedFunction { name: String, arity: usize },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Evaluation timed out after {timeout_ms} ms")]
    EvaluationTimeout { timeout_ms: u64 },

    #[error("Syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },
}

impl EvalError {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        EvalError::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Stable error-kind name shown to users next to the cell.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::UnknownColumn { .. } => "UnknownColumnError",
            EvalError::UnsupportedFunction { .. } => "UnsupportedFunctionError",
            EvalError::TypeMismatch { .. } => "TypeMismatchError",
            EvalError::DivisionByZero => "DivisionByZeroError",
            EvalError::EvaluationTimeout { .. } => "EvaluationTimeoutError",
            EvalError::Syntax { .. } => "SyntaxError",
        }
    }
}

//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while loading a single module.  Never fatal to the process: the
/// loader logs it and marks the module disabled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleLoadError {
    #[error("module '{module}' is not compiled into this build")]
    Unknown { module: String },

    #[error("module '{module}' failed to register: {reason}")]
    Registration { module: String, reason: String },

    #[error("module '{module}' panicked during registration: {message}")]
    Panicked { module: String, message: String },

    #[error("module '{module}' registered a malformed binding: {detail}")]
    MalformedBinding { module: String, detail: String },
}

impl ModuleLoadError {
    pub fn module(&self) -> &str {
        match self {
            ModuleLoadError::Unknown { module }
            | ModuleLoadError::Registration { module, .. }
            | ModuleLoadError::Panicked { module, .. }
            | ModuleLoadError::MalformedBinding { module, .. } => module,
        }
    }
}

/// Error returned by a module's registration entry point, or by a binding
/// call it made.  The loader wraps it into [`ModuleLoadError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RegistrationError(pub String);

impl RegistrationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Error returned by an event subscriber.  Caught by the router and logged;
/// never propagated to the publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Record table and vector index disagree.
    #[error("memory inconsistency: {records} records vs {vectors} vectors")]
    Consistency { records: usize, vectors: usize },

    #[error("persist failed: {0}")]
    Persist(String),

    #[error("memory store lock poisoned")]
    Poisoned,

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PriorityError {
    #[error("{field} must be within 0..=10, got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("invalid priority weights: {0}")]
    InvalidWeights(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

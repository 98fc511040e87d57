//! Error types for the pool system

use std::time::Duration;
use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Error produced by a [`Factory`](crate::pooling::Factory) when creation fails
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pool system errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Operation attempted on a closed pool
    #[error("Pool is closed")]
    Closed,

    /// Key is not known to the configured key supplier
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A required dependency or setting was missing or inconsistent
    #[error("Invalid construction: {0}")]
    InvalidConstruction(String),

    /// Factory failed to create a resource
    #[error("Failed to create resource: {0}")]
    Create(#[source] FactoryError),

    /// Lease was presented to a pool that did not issue it
    #[error("Lease does not belong to this pool")]
    ForeignLease,

    /// No resource became available before the deadline
    #[error("Timed out after {0:?} waiting for a resource")]
    Timeout(Duration),
}

impl PoolError {
    /// Create an invalid key error
    pub fn invalid_key<S: Into<String>>(msg: S) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create an invalid construction error
    pub fn invalid_construction<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConstruction(msg.into())
    }

    /// Create a resource creation error
    pub fn create<E: Into<FactoryError>>(err: E) -> Self {
        Self::Create(err.into())
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Closed pools, unknown keys, misuse and misconfiguration never recover
    /// by trying again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Create(_) | Self::Timeout(_))
    }
}

/// Failure of [`ExecutingPool::execute`](crate::pooling::ExecutingPool::execute)
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// No resource could be borrowed
    Pool(PoolError),
    /// The caller's operation failed on every permitted attempt
    Operation {
        /// Number of attempts made, including the first
        attempts: u32,
        /// Cause of the last failed attempt
        source: E,
    },
}

impl<E> ExecuteError<E> {
    /// The pool error, if borrowing was what failed
    pub fn as_pool_error(&self) -> Option<&PoolError> {
        match self {
            ExecuteError::Pool(e) => Some(e),
            ExecuteError::Operation { .. } => None,
        }
    }

    /// Consume the error and return the operation's last cause, if any
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ExecuteError::Operation { source, .. } => Some(source),
            ExecuteError::Pool(_) => None,
        }
    }
}

impl<E> From<PoolError> for ExecuteError<E> {
    fn from(err: PoolError) -> Self {
        ExecuteError::Pool(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteError::Pool(e) => write!(f, "{}", e),
            ExecuteError::Operation { attempts, source } => {
                write!(f, "Operation failed after {} attempt(s): {}", attempts, source)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ExecuteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecuteError::Pool(e) => Some(e),
            ExecuteError::Operation { source, .. } => Some(source),
        }
    }
}

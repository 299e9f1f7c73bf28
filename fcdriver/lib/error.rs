//! `fcdriver::error` is a module containing error utilities for the hypervisor driver.

use std::{
    error::Error,
    fmt::{self, Display},
    time::Duration,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a driver operation.
pub type DriverResult<T> = Result<T, DriverError>;

/// An error that occurred while launching or controlling a hypervisor session.
#[derive(pretty_error_debug::Debug, Error)]
pub enum DriverError {
    /// The hypervisor binary could not be found.
    #[error("binary not found at: {0}\nSource: {1}")]
    BinaryNotFound(String, String),

    /// The hypervisor binary path points at a directory.
    #[error("binary, {0}, is a directory")]
    BinaryIsDirectory(String),

    /// The hypervisor binary is not executable.
    #[error("binary, {0}, is not executable. Check permissions of binary")]
    BinaryNotExecutable(String),

    /// An error that occurred when performing an IO operation.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// An error that occurred when encoding or decoding an API payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred on the API socket connection.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// An API request could not be built.
    #[error("invalid http request: {0}")]
    HttpRequest(#[from] hyper::http::Error),

    /// The Firecracker API rejected a request.
    #[error("firecracker api returned {status} for {method} {path}: {body}")]
    Api {
        /// The request method.
        method: String,

        /// The request path.
        path: String,

        /// The response status code.
        status: u16,

        /// The response body.
        body: String,
    },

    /// The API socket never became available.
    #[error("api socket did not appear at {0}")]
    SocketUnavailable(String),

    /// A network namespace or CNI operation failed.
    #[error("network setup failed: {0}")]
    Network(String),

    /// An operation did not complete within its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,

        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The hypervisor process exited with a non-zero code.
    #[error("hypervisor process exited with code {0}")]
    ProcessFailed(i32),

    /// The hypervisor process is no longer running.
    #[error("hypervisor process has already exited")]
    ProcessExited,

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DriverError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> DriverError {
        DriverError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns `true` if the error is a deadline expiry rather than a failure reported by the
    /// hypervisor.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

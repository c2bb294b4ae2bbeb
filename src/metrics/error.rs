use std::io;

use thiserror::Error;

/// Failure of a single call into the metrics provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no such process (pid={0})")]
    NoSuchProcess(u32),
    #[error("access denied (pid={0})")]
    AccessDenied(u32),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("{0}")]
    Unavailable(String),
    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("reading {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

impl ProviderError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        ProviderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The sensor utility could not produce output.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },
}

/// A category-fatal failure: one category's provider call raised.
#[derive(Debug, Error)]
#[error("{category}: {source}")]
pub struct CategoryError {
    pub category: &'static str,
    #[source]
    pub source: ProviderError,
}

/// Terminal failure: every attempt allowed by the retry policy failed.
#[derive(Debug, Error)]
#[error("collection failed after {attempts} attempts, last error: {last}")]
pub struct CollectionFailed {
    pub attempts: u32,
    #[source]
    pub last: CategoryError,
}

#[derive(Debug, Error)]
pub enum ProcessCollectError {
    #[error("no such process (pid={pid}): {source}")]
    NoSuchProcess {
        pid: u32,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Failed(#[from] CollectionFailed),
}

/// Outcome of extracting a pid from an inbound event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PidError {
    #[error("event carries no `{field}`")]
    Missing { field: String },
    #[error("`{field}` is not a valid pid: {value}")]
    Invalid { field: String, value: String },
}

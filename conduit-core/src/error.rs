//! Error types for stream operations

use std::sync::Arc;

use thiserror::Error;

/// Stream error types
///
/// `Error` is `Clone` because a closed pipe reports the same terminal
/// condition to every `next` call after its buffer has drained.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The producer closed cleanly and every buffered value was consumed.
    #[error("end of stream")]
    EndOfStream,

    #[error("operation cancelled")]
    Cancelled,

    #[error("pour to closed sink")]
    Closed,

    #[error("out of bounds: sequence {seq}")]
    OutOfBounds { seq: u64 },

    /// More than one sink failed during a single broadcast fan-out.
    #[error("{} sinks failed: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<Error>),

    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl Error {
    /// Wrap an arbitrary message as a caller-supplied failure
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Other(Arc::new(anyhow::Error::msg(message)))
    }

    /// Wrap an arbitrary error as a caller-supplied failure
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(anyhow::Error::new(err)))
    }

    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    #[must_use]
    pub const fn is_out_of_bounds(&self) -> bool {
        matches!(self, Self::OutOfBounds { .. })
    }

    /// Flatten this error into its underlying failures
    ///
    /// An aggregate yields each member (recursively); any other error yields itself.
    #[must_use]
    pub fn errors(&self) -> Vec<&Self> {
        match self {
            Self::Aggregate(errs) => errs.iter().flat_map(Self::errors).collect(),
            other => vec![other],
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(Arc::new(err))
    }
}

fn join_messages(errs: &[Error]) -> String {
    errs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shorthand for [`Error::is_end_of_stream`] on a borrowed error
#[must_use]
pub const fn is_end_of_stream(err: &Error) -> bool {
    err.is_end_of_stream()
}

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, Error>;

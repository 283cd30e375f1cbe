//! Unified error type for the reframer stage.
//!
//! Every failure the stage can report ends up in [`Error`]. Failures are
//! grouped into three families via [`Error::category`]: configuration errors
//! that make the session impossible, data anomalies, and internal failures.
//! The stage keeps the first fatal error and replays it on every later tick,
//! which is why the type is `Clone`.

use std::fmt;

/// Unified error type covering all failure modes of the reframer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The configuration describes a session that cannot be run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A range starts before data that has already been consumed and the
    /// source cannot seek back.
    #[error("Range {index} starts at {start} before consumed data and the source cannot seek")]
    OutOfOrderRange {
        /// Zero-based index of the offending range.
        index: usize,
        /// Human-readable start bound.
        start: String,
    },

    /// A lane delivers buffers that cannot be retained, which split modes
    /// require.
    #[error("Lane {lane} carries non-releasable buffers; split modes need to retain packets")]
    NonReleasableBuffer {
        /// The lane that delivered the buffer.
        lane: usize,
    },

    /// No UTC reference showed up before the probe deadline.
    #[error("No UTC reference found within {timeout_ms} ms")]
    UtcProbeTimeout {
        /// The probe window that elapsed.
        timeout_ms: u64,
    },

    /// A lane identifier does not name an attached lane.
    #[error("Unknown lane: {0}")]
    UnknownLane(usize),

    /// A timestamp or payload computation failed while rewriting output.
    #[error("Stage error [{step}]: {message}")]
    Stage {
        /// The processing step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Input data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(String),
}

/// Failure family of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The session cannot run as configured.
    Configuration,
    /// Input data was malformed.
    Data,
    /// Something went wrong inside the stage or around it.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Data => write!(f, "data"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Map this error to its failure family.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Configuration,
            Error::OutOfOrderRange { .. } => ErrorCategory::Configuration,
            Error::NonReleasableBuffer { .. } => ErrorCategory::Configuration,
            Error::UtcProbeTimeout { .. } => ErrorCategory::Configuration,
            Error::UnknownLane(_) => ErrorCategory::Internal,
            Error::Stage { .. } => ErrorCategory::Internal,
            Error::Validation(_) => ErrorCategory::Data,
            Error::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Convenience constructor for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Convenience constructor for [`Error::OutOfOrderRange`].
    pub fn out_of_order(index: usize, start: impl fmt::Display) -> Self {
        Error::OutOfOrderRange {
            index,
            start: start.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Stage`].
    pub fn stage(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Stage {
            step: step.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_display() {
        let err = Error::config("seek rounding needs a single range");
        assert_eq!(
            err.to_string(),
            "Configuration error: seek rounding needs a single range"
        );
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn out_of_order_display() {
        let err = Error::out_of_order(1, "5");
        assert_eq!(
            err.to_string(),
            "Range 1 starts at 5 before consumed data and the source cannot seek"
        );
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn non_releasable_display() {
        let err = Error::NonReleasableBuffer { lane: 2 };
        assert!(err.to_string().contains("Lane 2"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn utc_timeout_display() {
        let err = Error::UtcProbeTimeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "No UTC reference found within 5000 ms");
    }

    #[test]
    fn stage_display() {
        let err = Error::stage("rewrite", "payload too short");
        assert_eq!(err.to_string(), "Stage error [rewrite]: payload too short");
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn validation_is_data() {
        let err = Error::Validation("bad trace".into());
        assert_eq!(err.category(), ErrorCategory::Data);
        assert_eq!(err.category().to_string(), "data");
    }

    #[test]
    fn io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: Error = io_err.into();
        assert_eq!(err.to_string(), "IO error: file missing");
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn errors_clone_equal() {
        let err = Error::UnknownLane(4);
        assert_eq!(err.clone(), err);
    }
}

//! Error types for Burrow

use thiserror::Error;

use crate::NamespaceType;

/// Burrow error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Malformed request, rejected before touching the kernel
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// Attempt to switch a running thread into a different user namespace
    #[error("cannot switch a thread into a different user namespace")]
    UserNamespaceSwitch,

    /// The current thread lost its namespace bookkeeping earlier and must not be used
    #[error("thread is tainted: a previous namespace restoration failed")]
    TaintedThread,

    /// Namespace operation failed
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
    },

    /// A thread could not be switched back into its original namespace
    #[error("cannot restore original {namespace} namespace: {source}")]
    Restoration {
        /// Type of the namespace that could not be restored
        namespace: NamespaceType,
        /// Reason reported by the kernel
        #[source]
        source: nix::Error,
    },

    /// Starting a broker child process failed
    #[error("Spawn error: {message}")]
    Spawn {
        /// Error message
        message: String,
    },

    /// Message could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Message could not be decoded
    #[error("Decode error: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// Channel send or receive failed
    #[error("Channel error: {message}")]
    Channel {
        /// Error message
        message: String,
    },

    /// The peer closed its channel end
    #[error("peer disconnected")]
    Disconnected,

    /// No message arrived before the deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The broker answered with an error response
    #[error("Broker error: {reason}")]
    Broker {
        /// Reason reported by the broker
        reason: String,
    },

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a namespace error
    pub fn namespace(message: impl Into<String>) -> Self {
        Self::Namespace {
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }
}

/// Result type alias for Burrow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restoration_names_namespace() {
        let err = Error::Restoration {
            namespace: NamespaceType::Net,
            source: nix::Error::EPERM,
        };
        let msg = err.to_string();
        assert!(msg.contains("net"));
        assert!(msg.contains("restore"));
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            Error::invalid_request("no space requested"),
            Error::InvalidRequest { .. }
        ));
        assert_eq!(
            Error::channel("boom").to_string(),
            "Channel error: boom".to_string()
        );
    }
}

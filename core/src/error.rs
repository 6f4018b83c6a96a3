//! Error types for the change-set client.
//!
//! # Design
//! Usage errors (empty change set, GET inside a change set, blank target) are
//! raised before any network I/O and are identifiable through
//! `BatchError::is_usage`. Transport failures keep their own type so callers
//! can tell "never reached the server" apart from "the server rejected the
//! whole batch" (`HttpStatus`). Problems inside individual response parts are
//! never errors; they only shorten the result list.

use thiserror::Error;

/// Failures raised by the transport collaborator.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established or was interrupted.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The transport gave up waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// The transport could not be constructed from its configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by `BatchClient` and the change-set encoder.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A change set must carry at least one operation.
    #[error("change set contains no operations")]
    EmptyChangeSet,

    /// Read operations cannot take part in a change set.
    #[error("GET is not allowed inside a change set (content-id {content_id})")]
    GetInChangeSet { content_id: u32 },

    /// The operation has no target path.
    #[error("operation with content-id {content_id} has a blank target path")]
    BlankTargetPath { content_id: u32 },

    /// An operation payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The request never produced a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected the batch as a whole.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// A successful response that does not carry a multipart boundary.
    #[error("batch response is not multipart (content-type: {content_type:?})")]
    UnparseableResponse { content_type: Option<String> },
}

impl BatchError {
    /// True for caller mistakes detected before any I/O was attempted.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            BatchError::EmptyChangeSet
                | BatchError::GetInChangeSet { .. }
                | BatchError::BlankTargetPath { .. }
                | BatchError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(e: serde_json::Error) -> Self {
        BatchError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_classified() {
        assert!(BatchError::EmptyChangeSet.is_usage());
        assert!(BatchError::GetInChangeSet { content_id: 1 }.is_usage());
        assert!(BatchError::BlankTargetPath { content_id: 2 }.is_usage());
        assert!(!BatchError::Transport(TransportError::Timeout).is_usage());
        assert!(!BatchError::HttpStatus {
            status: 500,
            body: String::new()
        }
        .is_usage());
    }

    #[test]
    fn transport_error_displays_verbatim() {
        let err = BatchError::from(TransportError::Connection("refused".to_string()));
        assert_eq!(err.to_string(), "connection failed: refused");
    }
}

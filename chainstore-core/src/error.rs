//! Error types for chainstore operations

use std::time::Duration;
use thiserror::Error;

/// Argument and payload validation errors.
///
/// These are raised synchronously to the immediate caller and are never
/// swallowed by the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Argument is not an object id: {value:?}")]
    InvalidObjectId { value: String },

    #[error("Argument is not a vote id: {value:?}")]
    InvalidVoteId { value: String },

    #[error("Argument is not an account name: {value:?} ({reason})")]
    InvalidAccountName { value: String, reason: &'static str },

    #[error("Object {id} is a {actual}, expected {expected}")]
    WrongKind {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Object is missing required field {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Failures reported by the remote database collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Remote rejected {method}: {message}")]
    Rejected { method: String, message: String },

    #[error("Remote call {method} timed out")]
    TimedOut { method: String },
}

/// Lifecycle synchronization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(
        "Chain head is still {head_age_secs}s behind the local clock after {attempts} attempts, \
         please check your system clock"
    )]
    ClockSkew { attempts: u32, head_age_secs: i64 },

    #[error("Dynamic global property object {id} was not returned after {attempts} attempts")]
    MissingHeadState { id: String, attempts: u32 },

    #[error("Store was reset while the request was in flight")]
    Reset,

    #[error("Concurrent synchronization ended without going live")]
    Interrupted,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Object types {first} and {second} share type number {type_id} in space {space}")]
    DuplicateTypeNumber {
        space: u8,
        type_id: u16,
        first: &'static str,
        second: &'static str,
    },
}

/// Master error type for all chainstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timed out after {waited:?} waiting for objects to resolve")]
    Timeout { waited: Duration },

    #[error("ChainStore must be created inside a tokio runtime")]
    NoRuntime,
}

impl StoreError {
    /// True for the bulk resolver's timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for chainstore operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_invalid_object_id() {
        let err = ValidationError::InvalidObjectId {
            value: "1.2".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not an object id"));
        assert!(msg.contains("\"1.2\""));
    }

    #[test]
    fn test_rpc_error_display_names_method() {
        let err = RpcError::Rejected {
            method: "get_objects".to_string(),
            message: "unknown id".to_string(),
        };
        assert_eq!(format!("{}", err), "Remote rejected get_objects: unknown id");
    }

    #[test]
    fn test_sync_error_mentions_clock() {
        let err = SyncError::ClockSkew {
            attempts: 11,
            head_age_secs: 3600,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("system clock"));
        assert!(msg.contains("3600"));
    }

    #[test]
    fn test_store_error_from_conversions() {
        let err: StoreError = RpcError::Transport {
            reason: "socket closed".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Rpc(_)));

        let err: StoreError = ValidationError::MissingField { field: "id" }.into();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_error() {
        let err = StoreError::Timeout {
            waited: Duration::from_millis(100),
        };
        assert!(err.is_timeout());
        assert!(format!("{}", err).contains("100ms"));
    }
}

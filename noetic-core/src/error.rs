//! Error types and result types for collection operations.
//!
//! Every public operation resolves to a [`DocumentStoreResult<T>`]. Engine
//! implementations report their own failures as [`DocumentStoreError::Backend`];
//! the core maps those onto the operation-level variants (open, read, write,
//! transaction) before they reach the caller.

use std::time::Duration;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a collection.
///
/// The enum is `Clone` because a single in-flight connection open is shared by
/// every caller waiting on it, and each of them receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between record formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A collection name or declaration is invalid, or the name is not registered.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A record was rejected because none of the declared key-path fields is present.
    #[error(
        "Cannot insert into \"{collection}\"{}: missing required key path. Required (at least one): {}. Missing: {}. Received data: {record}",
        .index.map(|i| format!(" (item {i})")).unwrap_or_default(),
        quote_fields(.required),
        quote_fields(.missing),
    )]
    Validation {
        /// The collection the write targeted.
        collection: String,
        /// The declared key-path fields, any one of which satisfies the check.
        required: Vec<String>,
        /// The declared key-path fields absent from the record.
        missing: Vec<String>,
        /// The offending record rendered as JSON.
        record: String,
        /// Position of the record within a batch insert.
        index: Option<usize>,
    },
    /// The engine failed to open or upgrade a collection. The cached connection was evicted.
    #[error("Failed to open collection \"{collection}\": {reason}")]
    EngineOpen {
        /// The collection being opened.
        collection: String,
        /// The engine's reason.
        reason: String,
    },
    /// An add or update request failed inside a transaction.
    #[error(
        "Failed to write into \"{collection}\"{}: {reason}",
        .index.map(|i| format!(" (item {i})")).unwrap_or_default(),
    )]
    EngineWrite {
        /// The collection being written.
        collection: String,
        /// Position of the failing record within a batch insert.
        index: Option<usize>,
        /// The engine's reason.
        reason: String,
    },
    /// Opening or advancing a cursor, or reading a snapshot, failed.
    #[error("Failed to read from \"{collection}\": {reason}")]
    EngineRead {
        /// The collection being read.
        collection: String,
        /// The engine's reason.
        reason: String,
    },
    /// The enclosing transaction failed to start, commit, or was aborted.
    #[error("Transaction failed for \"{collection}\": {reason}")]
    Transaction {
        /// The collection the transaction was scoped to.
        collection: String,
        /// The engine's reason.
        reason: String,
    },
    /// The engine did not complete an operation before its deadline.
    #[error("{operation} on \"{collection}\" timed out after {after:?}")]
    Timeout {
        /// The collection the operation targeted.
        collection: String,
        /// The operation that expired.
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },
    /// An error reported by the underlying storage engine.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// Returns the engine-level reason for this error.
    ///
    /// For [`DocumentStoreError::Backend`] this is the bare engine message, which is
    /// what the core attaches when it re-labels an engine failure.
    pub fn reason(&self) -> String {
        match self {
            DocumentStoreError::Backend(message) => message.clone(),
            DocumentStoreError::EngineOpen { reason, .. }
            | DocumentStoreError::EngineWrite { reason, .. }
            | DocumentStoreError::EngineRead { reason, .. }
            | DocumentStoreError::Transaction { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn open(collection: &str, source: DocumentStoreError) -> Self {
        DocumentStoreError::EngineOpen {
            collection: collection.to_string(),
            reason: source.reason(),
        }
    }

    pub(crate) fn write(collection: &str, index: Option<usize>, source: DocumentStoreError) -> Self {
        DocumentStoreError::EngineWrite {
            collection: collection.to_string(),
            index,
            reason: source.reason(),
        }
    }

    pub(crate) fn read(collection: &str, source: DocumentStoreError) -> Self {
        DocumentStoreError::EngineRead {
            collection: collection.to_string(),
            reason: source.reason(),
        }
    }

    pub(crate) fn transaction(collection: &str, source: DocumentStoreError) -> Self {
        DocumentStoreError::Transaction {
            collection: collection.to_string(),
            reason: source.reason(),
        }
    }
}

fn quote_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| format!("\"{field}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A specialized `Result` type for collection operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_required_and_missing_fields() {
        let err = DocumentStoreError::Validation {
            collection: "users".to_string(),
            required: vec!["id".to_string(), "email".to_string()],
            missing: vec!["id".to_string(), "email".to_string()],
            record: r#"{"name":"NoId"}"#.to_string(),
            index: None,
        };

        let message = err.to_string();
        assert!(message.contains("\"users\""));
        assert!(message.contains("Required (at least one): \"id\", \"email\""));
        assert!(message.contains("Missing: \"id\", \"email\""));
        assert!(message.contains(r#"{"name":"NoId"}"#));
    }

    #[test]
    fn batch_errors_name_the_failing_item() {
        let err = DocumentStoreError::write(
            "users",
            Some(3),
            DocumentStoreError::Backend("ConstraintError: key already exists".to_string()),
        );

        assert_eq!(
            err.to_string(),
            "Failed to write into \"users\" (item 3): ConstraintError: key already exists"
        );
    }

    #[test]
    fn relabelling_keeps_the_engine_reason() {
        let err = DocumentStoreError::open(
            "users",
            DocumentStoreError::Backend("VersionError".to_string()),
        );

        assert_eq!(err.reason(), "VersionError");
        assert!(matches!(err, DocumentStoreError::EngineOpen { .. }));
    }
}

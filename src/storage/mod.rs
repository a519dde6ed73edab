//! Document storage collaborator.
//!
//! The core only emits write/update intents keyed by collection and document
//! id; where they land is up to the [`Storage`] implementation.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod file;
pub mod memory;
pub mod records;

pub const ACCIDENT_COLLECTION: &str = "accident_data";
pub const TRAFFIC_COLLECTION: &str = "traffic_data";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("document {collection}/{document_id} not found")]
    NotFound {
        collection: String,
        document_id: String,
    },
    #[error("invalid document key: {0}")]
    InvalidKey(String),
    #[error("document {0} is not a JSON object")]
    NotAnObject(String),
    #[error("storage lock poisoned")]
    Lock,
}

pub trait Storage: Send + Sync {
    /// Create or replace a document.
    fn write(&self, collection: &str, document_id: &str, record: Value) -> Result<(), StorageError>;
    /// Merge `fields` into an existing document.
    fn update(
        &self,
        collection: &str,
        document_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StorageError>;
}

pub fn write_record<T: Serialize>(
    storage: &dyn Storage,
    collection: &str,
    document_id: &str,
    record: &T,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(record)?;
    storage.write(collection, document_id, value)
}

/// Collection names and document ids become path segments in some stores.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

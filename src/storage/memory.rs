use crate::storage::{Storage, StorageError, validate_key};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, document_id: &str) -> Option<Value> {
        let guard = self.documents.lock().ok()?;
        guard
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned()
    }

    /// Document ids in `collection`, in id order.
    pub fn document_ids(&self, collection: &str) -> Vec<String> {
        self.documents
            .lock()
            .map(|guard| {
                guard
                    .keys()
                    .filter(|(owner, _)| owner == collection)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Storage for MemoryStore {
    fn write(&self, collection: &str, document_id: &str, record: Value) -> Result<(), StorageError> {
        validate_key(collection)?;
        validate_key(document_id)?;
        let mut guard = self.documents.lock().map_err(|_| StorageError::Lock)?;
        guard.insert((collection.to_string(), document_id.to_string()), record);
        Ok(())
    }

    fn update(
        &self,
        collection: &str,
        document_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let mut guard = self.documents.lock().map_err(|_| StorageError::Lock)?;
        let document = guard
            .get_mut(&(collection.to_string(), document_id.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                collection: collection.to_string(),
                document_id: document_id.to_string(),
            })?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| StorageError::NotAnObject(document_id.to_string()))?;
        object.extend(fields);
        Ok(())
    }
}

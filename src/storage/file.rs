use crate::storage::{Storage, StorageError, validate_key};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// One pretty-printed JSON file per document: `<root>/<collection>/<id>.json`.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write updates.
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store root. Fails when the directory is not writable.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let probe = root.join(".write-probe");
        fs::write(&probe, b"")?;
        fs::remove_file(&probe)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn read(&self, collection: &str, document_id: &str) -> Result<Value, StorageError> {
        let path = self.document_path(collection, document_id)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                collection: collection.to_string(),
                document_id: document_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn document_path(&self, collection: &str, document_id: &str) -> Result<PathBuf, StorageError> {
        validate_key(collection)?;
        validate_key(document_id)?;
        Ok(self
            .root
            .join(collection)
            .join(format!("{document_id}.json")))
    }

    fn store(&self, path: &Path, value: &Value) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Storage for FileStore {
    fn write(&self, collection: &str, document_id: &str, record: Value) -> Result<(), StorageError> {
        let path = self.document_path(collection, document_id)?;
        let _guard = self.lock.lock().map_err(|_| StorageError::Lock)?;
        self.store(&path, &record)?;
        info!(collection, document_id, "Wrote document");
        Ok(())
    }

    fn update(
        &self,
        collection: &str,
        document_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let path = self.document_path(collection, document_id)?;
        let _guard = self.lock.lock().map_err(|_| StorageError::Lock)?;
        let mut document = self.read(collection, document_id)?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| StorageError::NotAnObject(document_id.to_string()))?;
        let updated: Vec<String> = fields.keys().cloned().collect();
        object.extend(fields);
        self.store(&path, &document)?;
        info!(collection, document_id, fields = ?updated, "Updated document");
        Ok(())
    }
}

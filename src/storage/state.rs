use crate::core::error::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Table definition for file fingerprints
/// Key: absolute file path, value: JSON serialized FileState
const FINGERPRINT_TABLE: TableDefinition<&str, &str> = TableDefinition::new("fingerprints");

/// Store-level metadata (embedding model the index was built with)
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");
const META_MODEL_ID_KEY: &str = "model_id";

/// Fingerprint of an indexed file
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileState {
    /// SHA256 hash of file contents
    pub content_hash: String,
    /// Timestamp when file was last indexed
    pub indexed_at: u64,
}

impl FileState {
    pub fn new(content_hash: String) -> Self {
        Self {
            content_hash,
            indexed_at: unix_now(),
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize file state: {}", e)))
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize file state: {}", e)))
    }
}

/// Persistent path → fingerprint table.
///
/// Only whole batches are written; callers keep the working copy in memory.
pub struct FingerprintStore {
    db: Database,
}

impl FingerprintStore {
    /// Open or create the fingerprint store
    pub fn open(state_path: &Path) -> Result<Self> {
        if let Some(parent) = state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(state_path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::Database("State database is locked. Another tierdex process may be running. Close other instances and try again.".to_string())
            } else {
                Error::Database(format!("Failed to open state database: {}", e))
            }
        })?;

        let write_txn = db.begin_write().map_err(db_err("begin write transaction"))?;
        {
            write_txn.open_table(FINGERPRINT_TABLE).map_err(db_err("open table"))?;
            write_txn.open_table(META_TABLE).map_err(db_err("open table"))?;
        }
        write_txn.commit().map_err(db_err("commit transaction"))?;

        Ok(Self { db })
    }

    /// Load every persisted fingerprint
    pub fn load_all(&self) -> Result<HashMap<String, FileState>> {
        let read_txn = self.db.begin_read().map_err(db_err("begin read transaction"))?;
        let table = read_txn.open_table(FINGERPRINT_TABLE).map_err(db_err("open table"))?;

        let mut entries = HashMap::new();
        for item in table.iter().map_err(db_err("iterate table"))? {
            let (key, value) = item.map_err(db_err("read table item"))?;
            match FileState::from_json(value.value()) {
                Ok(state) => {
                    entries.insert(key.value().to_string(), state);
                }
                Err(e) => {
                    // A corrupt entry only costs a re-index of that file
                    tracing::warn!(path = key.value(), error = %e, "dropping unreadable fingerprint");
                }
            }
        }
        Ok(entries)
    }

    /// Apply upserts and removals in a single transaction
    pub fn write_batch<'a>(
        &self,
        upserts: impl IntoIterator<Item = (&'a str, &'a FileState)>,
        removals: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err("begin write transaction"))?;
        {
            let mut table = write_txn.open_table(FINGERPRINT_TABLE).map_err(db_err("open table"))?;
            for (path, state) in upserts {
                let json = state.to_json()?;
                table
                    .insert(path, json.as_str())
                    .map_err(db_err("insert file state"))?;
            }
            for path in removals {
                table.remove(path).map_err(db_err("remove file state"))?;
            }
        }
        write_txn.commit().map_err(db_err("commit transaction"))?;
        Ok(())
    }

    /// Remove every fingerprint
    pub fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err("begin write transaction"))?;
        {
            write_txn.delete_table(FINGERPRINT_TABLE).map_err(db_err("delete table"))?;
            write_txn.open_table(FINGERPRINT_TABLE).map_err(db_err("open table"))?;
        }
        write_txn.commit().map_err(db_err("commit transaction"))?;
        Ok(())
    }

    pub fn get_model_id(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(db_err("begin read transaction"))?;
        let table = read_txn.open_table(META_TABLE).map_err(db_err("open table"))?;
        let value = table.get(META_MODEL_ID_KEY).map_err(db_err("get model id"))?;
        Ok(value.map(|guard| guard.value().to_string()))
    }

    pub fn set_model_id(&self, model_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err("begin write transaction"))?;
        {
            let mut table = write_txn.open_table(META_TABLE).map_err(db_err("open table"))?;
            table
                .insert(META_MODEL_ID_KEY, model_id)
                .map_err(db_err("store model id"))?;
        }
        write_txn.commit().map_err(db_err("commit transaction"))?;
        Ok(())
    }
}

fn db_err<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(format!("Failed to {}: {}", action, e))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Calculate SHA256 hash of file contents
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Get file modification time as Unix timestamp
pub fn get_file_modified_time(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let duration = modified.duration_since(UNIX_EPOCH).map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get modification time: {}", e),
        ))
    })?;
    Ok(duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_state_serialization() {
        let state = FileState::new("abc123".to_string());
        assert!(state.indexed_at > 0);

        let json = state.to_json().unwrap();
        assert!(json.contains("abc123"));
        assert_eq!(FileState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn test_write_batch_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("state").join("state.redb");

        {
            let store = FingerprintStore::open(&state_path).unwrap();
            assert!(store.load_all().unwrap().is_empty());

            let a = FileState::new("hash-a".to_string());
            let b = FileState::new("hash-b".to_string());
            store
                .write_batch([("/notes/a.md", &a), ("/notes/b.md", &b)], [])
                .unwrap();
            store.write_batch([], ["/notes/a.md"]).unwrap();
        }

        let store = FingerprintStore::open(&state_path).unwrap();
        let entries = store.load_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["/notes/b.md"].content_hash, "hash-b");

        store.clear().unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_model_id_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(&temp_dir.path().join("state.redb")).unwrap();
        assert_eq!(store.get_model_id().unwrap(), None);
        store.set_model_id("hashing-384").unwrap();
        assert_eq!(store.get_model_id().unwrap().as_deref(), Some("hashing-384"));
    }

    #[test]
    fn test_calculate_file_hash() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        fs::write(&test_file, "Hello, world!").unwrap();
        let hash1 = calculate_file_hash(&test_file).unwrap();
        assert_eq!(hash1.len(), 64); // SHA256 produces 64 hex characters
        assert_eq!(hash1, calculate_file_hash(&test_file).unwrap());

        fs::write(&test_file, "Different content").unwrap();
        assert_ne!(hash1, calculate_file_hash(&test_file).unwrap());

        // Larger than the read buffer
        fs::write(&test_file, "x".repeat(10000)).unwrap();
        assert_eq!(calculate_file_hash(&test_file).unwrap().len(), 64);
    }

    #[test]
    fn test_get_file_modified_time() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, "Test content").unwrap();

        assert!(get_file_modified_time(&test_file).unwrap() > 0);
        assert!(get_file_modified_time(Path::new("/nonexistent/file.txt")).is_err());
    }
}

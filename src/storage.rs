// Key-value persistence media: in-memory, JSON files, SQLite

use crate::error::{Result, StoreError};
use crate::record::Record;
use chrono::Utc;
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key written and removed by the start-up self-test
pub const SELF_TEST_KEY: &str = "todoapp-test";

/// Local key-value medium the store persists into
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    fn remove(&mut self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}

/// Write, read back and remove a probe value. Any failure or mismatch
/// means the medium cannot be trusted for this session.
pub fn self_test(storage: &mut dyn Storage) -> Result<()> {
    storage
        .set(SELF_TEST_KEY, "test")
        .map_err(|e| StoreError::unavailable(format!("write failed: {}", e)))?;
    let value = storage
        .get(SELF_TEST_KEY)
        .map_err(|e| StoreError::unavailable(format!("read failed: {}", e)))?;
    storage
        .remove(SELF_TEST_KEY)
        .map_err(|e| StoreError::unavailable(format!("remove failed: {}", e)))?;

    if value.as_deref() != Some("test") {
        return Err(StoreError::unavailable(format!(
            "read back {:?}, expected \"test\"",
            value
        )));
    }
    Ok(())
}

/// Remove every key starting with `prefix`. Returns the number removed.
pub fn sweep(storage: &mut dyn Storage, prefix: &str) -> Result<usize> {
    let stale: Vec<String> = storage.keys()?.into_iter().filter(|k| k.starts_with(prefix)).collect();
    for key in &stale {
        storage.remove(key)?;
    }
    if !stale.is_empty() {
        info!(prefix, count = stale.len(), "Swept stale storage keys");
    }
    Ok(stale.len())
}

/// Read a whole collection stored as a JSON array under its collection key
pub fn read_collection<T: Record>(storage: &dyn Storage) -> Result<Option<Vec<T>>> {
    match storage.get(T::collection_name())? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Overwrite a whole collection under its collection key
pub fn write_collection<T: Record>(storage: &mut dyn Storage, records: &[T]) -> Result<()> {
    let json = serde_json::to_string(records)?;
    storage.set(T::collection_name(), &json)
}

fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "must not be empty"
    } else if key.len() > 64 {
        "longer than 64 chars"
    } else if !key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        "must be alphanumeric with _/-"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile medium, lost when dropped
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

// ============================================================================
// JSON files
// ============================================================================

/// One `{key}.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open or create a file store rooted at `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = ?dir, "Opened file storage");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        // Acquire exclusive lock before truncating
        file.lock_exclusive()?;
        file.set_len(0)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;

        // Lock is released when file is dropped
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Single `kv` table in a SQLite database
pub struct SqliteStorage {
    db: Connection,
}

impl SqliteStorage {
    /// Open or create the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path.as_ref())?;
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let storage = Self {
            db: Connection::open_in_memory()?,
        };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating kv schema");
        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.db.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.db.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

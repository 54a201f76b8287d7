//! # Registry Persistence
//!
//! Durable mirror of the registry as two entries under a base directory:
//!
//! ```text
//! {base_path}/
//! ├── nodes.list   # JSON array: full ordered address list
//! └── nodes.json   # JSON object: address → NodeRecord (minus live handle)
//! ```
//!
//! Files are opened with `create(true).write(true).truncate(true)` so a
//! write never leaves partial state from a previous snapshot, and every
//! write is followed by `flush()` + `sync_all()`.
//!
//! Live handles are not serializable; records loaded from disk always carry
//! `handle = None` and the session manager rebuilds handles on demand.

use std::collections::HashMap;
use std::fs;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::registry::NodeRecord;

/// Filename for the ordered address list.
const LIST_FILENAME: &str = "nodes.list";
/// Filename for the address → record mapping.
const RECORDS_FILENAME: &str = "nodes.json";

/// The full registry state as written to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedRegistry {
    pub addresses: Vec<String>,
    pub records: HashMap<String, NodeRecord>,
}

/// Durable key-value mirror for registry snapshots.
pub trait RegistryStore: Send + Sync {
    fn save(&self, snapshot: &PersistedRegistry) -> Result<(), io::Error>;

    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<PersistedRegistry>, io::Error>;
}

// ════════════════════════════════════════════════════════════════════════════
// FILE STORE
// ════════════════════════════════════════════════════════════════════════════

pub struct FileRegistryStore {
    base_path: PathBuf,
}

impl FileRegistryStore {
    /// Creates a store rooted at the given directory. The directory is
    /// created on first write, not here.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn write_entry(&self, filename: &str, payload: &str) -> Result<(), io::Error> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path)?;
        }
        let path = self.base_path.join(filename);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(payload.as_bytes())?;
        file.flush()?;
        file.sync_all()?;

        Ok(())
    }
}

impl RegistryStore for FileRegistryStore {
    fn save(&self, snapshot: &PersistedRegistry) -> Result<(), io::Error> {
        let list = serde_json::to_string(&snapshot.addresses)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let records = serde_json::to_string(&snapshot.records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_entry(LIST_FILENAME, &list)?;
        self.write_entry(RECORDS_FILENAME, &records)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedRegistry>, io::Error> {
        let list_path = self.base_path.join(LIST_FILENAME);
        let records_path = self.base_path.join(RECORDS_FILENAME);
        if !list_path.is_file() && !records_path.is_file() {
            return Ok(None);
        }

        let addresses: Vec<String> = match fs::read_to_string(&list_path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: {}", LIST_FILENAME, e),
                )
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let records: HashMap<String, NodeRecord> = match fs::read_to_string(&records_path)
        {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: {}", RECORDS_FILENAME, e),
                )
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Some(PersistedRegistry { addresses, records }))
    }
}

impl std::fmt::Debug for FileRegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistryStore")
            .field("base_path", &self.base_path)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NULL STORE
// ════════════════════════════════════════════════════════════════════════════

/// No-op store for tests and ephemeral registries.
#[derive(Debug, Default)]
pub struct NullRegistryStore;

impl RegistryStore for NullRegistryStore {
    fn save(&self, _snapshot: &PersistedRegistry) -> Result<(), io::Error> {
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedRegistry>, io::Error> {
        Ok(None)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use mystfleet_common::{HealthSnapshot, IdentityRef, StatsSnapshot};

    fn sample_snapshot() -> PersistedRegistry {
        let record = NodeRecord {
            address: "1.2.3.4:5000".to_string(),
            token: "abc".to_string(),
            handle: None,
            health: HealthSnapshot {
                uptime: 10,
                version: "1.0".to_string(),
            },
            stats: StatsSnapshot {
                count: 2,
                sum_tokens: 3_000_000_000_000_000_000,
            },
            identities: vec![IdentityRef {
                id: "idA".to_string(),
            }],
            services: vec![],
        };
        let mut records = HashMap::new();
        records.insert(record.address.clone(), record);
        PersistedRegistry {
            addresses: vec!["1.2.3.4:5000".to_string()],
            records,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRegistryStore::new(dir.path().join("registry"));
        store.save(&sample_snapshot()).expect("save");

        let loaded = store.load().expect("load").expect("some");
        assert_eq!(loaded.addresses, vec!["1.2.3.4:5000"]);
        let rec = loaded.records.get("1.2.3.4:5000").expect("record");
        assert_eq!(rec.token, "abc");
        assert_eq!(rec.health.uptime, 10);
        assert!(rec.handle.is_none());
    }

    #[test]
    fn test_load_nothing_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRegistryStore::new(dir.path().join("registry"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_load_corrupt_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("registry");
        fs::create_dir_all(&base).expect("mkdir");
        fs::write(base.join(LIST_FILENAME), r#"["a:1"]"#).expect("write");
        fs::write(base.join(RECORDS_FILENAME), "not json").expect("write");
        let store = FileRegistryStore::new(base);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRegistryStore::new(dir.path().join("registry"));
        store.save(&sample_snapshot()).expect("save");
        store.save(&PersistedRegistry::default()).expect("save empty");

        let loaded = store.load().expect("load").expect("some");
        assert!(loaded.addresses.is_empty());
        assert!(loaded.records.is_empty());
    }

    #[test]
    fn test_null_store() {
        let store = NullRegistryStore;
        store.save(&sample_snapshot()).expect("save");
        assert!(store.load().expect("load").is_none());
    }
}

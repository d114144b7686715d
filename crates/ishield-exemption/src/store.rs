// store.rs — Persistence for exemption records.
//
// JsonDirExemptionStore keeps each record as `<store_dir>/<name>.json`,
// which keeps records isolated and easy to inspect by hand.
// MemoryExemptionStore is the in-process equivalent.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ExemptionError;
use crate::record::ExemptionRecord;

/// CRUD over exemption records, keyed by record name.
pub trait ExemptionStore: Send + Sync {
    fn list(&self) -> Result<Vec<ExemptionRecord>, ExemptionError>;
    fn get(&self, name: &str) -> Result<Option<ExemptionRecord>, ExemptionError>;
    fn create(&self, record: &ExemptionRecord) -> Result<(), ExemptionError>;
    fn update(&self, record: &ExemptionRecord) -> Result<(), ExemptionError>;
    fn delete(&self, name: &str) -> Result<(), ExemptionError>;
}

pub struct JsonDirExemptionStore {
    store_dir: PathBuf,
}

impl JsonDirExemptionStore {
    /// Create a store backed by `store_dir`, creating it if needed.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, ExemptionError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| ExemptionError::Io {
            path: store_dir.clone(),
            source,
        })?;
        Ok(Self { store_dir })
    }

    fn record_file(&self, name: &str) -> Result<PathBuf, ExemptionError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(ExemptionError::InvalidName(name.to_string()));
        }
        Ok(self.store_dir.join(format!("{}.json", name)))
    }

    fn write(&self, path: PathBuf, record: &ExemptionRecord) -> Result<(), ExemptionError> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).map_err(|source| ExemptionError::Io { path, source })
    }
}

impl ExemptionStore for JsonDirExemptionStore {
    /// All records, sorted by name. Unreadable files are skipped with a
    /// warning.
    fn list(&self) -> Result<Vec<ExemptionRecord>, ExemptionError> {
        let entries = fs::read_dir(&self.store_dir).map_err(|source| ExemptionError::Io {
            path: self.store_dir.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ExemptionError::Io {
                path: self.store_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|source| ExemptionError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|json| Ok(serde_json::from_str::<ExemptionRecord>(&json)?))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable exemption record"),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn get(&self, name: &str) -> Result<Option<ExemptionRecord>, ExemptionError> {
        let path = self.record_file(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| ExemptionError::Io { path, source })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn create(&self, record: &ExemptionRecord) -> Result<(), ExemptionError> {
        let path = self.record_file(&record.name)?;
        if path.exists() {
            return Err(ExemptionError::AlreadyExists(record.name.clone()));
        }
        self.write(path, record)
    }

    fn update(&self, record: &ExemptionRecord) -> Result<(), ExemptionError> {
        let path = self.record_file(&record.name)?;
        if !path.exists() {
            return Err(ExemptionError::NotFound(record.name.clone()));
        }
        self.write(path, record)
    }

    fn delete(&self, name: &str) -> Result<(), ExemptionError> {
        let path = self.record_file(name)?;
        if !path.exists() {
            return Err(ExemptionError::NotFound(name.to_string()));
        }
        fs::remove_file(&path).map_err(|source| ExemptionError::Io { path, source })
    }
}

#[derive(Debug, Default)]
pub struct MemoryExemptionStore {
    records: Mutex<BTreeMap<String, ExemptionRecord>>,
}

impl MemoryExemptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExemptionStore for MemoryExemptionStore {
    fn list(&self) -> Result<Vec<ExemptionRecord>, ExemptionError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<ExemptionRecord>, ExemptionError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(name).cloned())
    }

    fn create(&self, record: &ExemptionRecord) -> Result<(), ExemptionError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.name) {
            return Err(ExemptionError::AlreadyExists(record.name.clone()));
        }
        records.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn update(&self, record: &ExemptionRecord) -> Result<(), ExemptionError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(&record.name) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(ExemptionError::NotFound(record.name.clone())),
        }
    }

    fn delete(&self, name: &str) -> Result<(), ExemptionError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ExemptionError::NotFound(name.to_string()))
    }
}

//! Replay Storage
//!
//! Persist finished records by id. Both stores keep records as JSON so a
//! stored replay can be inspected by hand.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::record::{ReplayError, ReplayId, ReplayRecord};

/// Replay persistence.
pub trait ReplayStore: Send + Sync {
    /// Store a record, replacing any with the same id.
    fn save(&self, record: &ReplayRecord) -> Result<ReplayId, ReplayError>;

    /// Load and validate a record.
    fn load(&self, id: ReplayId) -> Result<ReplayRecord, ReplayError>;

    /// Stored ids in ascending order.
    fn list(&self) -> Result<Vec<ReplayId>, ReplayError>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, id: ReplayId) -> Result<bool, ReplayError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryReplayStore {
    records: RwLock<BTreeMap<ReplayId, String>>,
}

impl MemoryReplayStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for MemoryReplayStore {
    fn save(&self, record: &ReplayRecord) -> Result<ReplayId, ReplayError> {
        record.validate()?;
        let json = record.to_json()?;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, json);
        debug!(replay = %record.id, "Replay stored in memory");
        Ok(record.id)
    }

    fn load(&self, id: ReplayId) -> Result<ReplayRecord, ReplayError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let json = records.get(&id).ok_or(ReplayError::NotFound(id))?;
        ReplayRecord::from_json(json)
    }

    fn list(&self) -> Result<Vec<ReplayId>, ReplayError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect())
    }

    fn delete(&self, id: ReplayId) -> Result<bool, ReplayError> {
        Ok(self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some())
    }
}

/// One `<id>.json` file per record under a directory.
#[derive(Debug, Clone)]
pub struct FileReplayStore {
    dir: PathBuf,
}

impl FileReplayStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ReplayError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Replay store opened");
        Ok(Self { dir })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: ReplayId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ReplayStore for FileReplayStore {
    fn save(&self, record: &ReplayRecord) -> Result<ReplayId, ReplayError> {
        record.validate()?;
        let path = self.path_for(record.id);
        fs::write(&path, record.to_json()?)?;
        debug!(replay = %record.id, path = %path.display(), "Replay written");
        Ok(record.id)
    }

    fn load(&self, id: ReplayId) -> Result<ReplayRecord, ReplayError> {
        let json = match fs::read_to_string(self.path_for(id)) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ReplayError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        let record = ReplayRecord::from_json(&json)?;
        if record.id != id {
            return Err(ReplayError::Inconsistent(format!(
                "file for {} holds replay {}",
                id, record.id
            )));
        }
        Ok(record)
    }

    fn list(&self) -> Result<Vec<ReplayId>, ReplayError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(Uuid::parse_str) {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(path = %path.display(), "Skipping unrecognized file in replay store"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: ReplayId) -> Result<bool, ReplayError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::record::tests::sample_record;

    fn exercise(store: &dyn ReplayStore) {
        let a = sample_record();
        let b = sample_record();
        assert_eq!(store.save(&a).unwrap(), a.id);
        store.save(&b).unwrap();

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
        assert_eq!(store.load(a.id).unwrap(), a);

        assert!(store.delete(a.id).unwrap());
        assert!(!store.delete(a.id).unwrap());
        assert!(matches!(store.load(a.id), Err(ReplayError::NotFound(id)) if id == a.id));
        assert_eq!(store.list().unwrap(), vec![b.id]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryReplayStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = std::env::temp_dir().join(format!("sol-replays-{}", Uuid::new_v4()));
        let store = FileReplayStore::new(&dir).unwrap();
        exercise(&store);

        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::write(dir.join("garbage.json"), "{}").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_refuses_invalid_record() {
        let store = MemoryReplayStore::new();
        let mut record = sample_record();
        record.version = 0;
        assert!(store.save(&record).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_detects_mismatched_id() {
        let dir = std::env::temp_dir().join(format!("sol-replays-{}", Uuid::new_v4()));
        let store = FileReplayStore::new(&dir).unwrap();
        let record = sample_record();
        let other = Uuid::new_v4();
        fs::write(dir.join(format!("{}.json", other)), record.to_json().unwrap()).unwrap();
        assert!(matches!(store.load(other), Err(ReplayError::Inconsistent(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}

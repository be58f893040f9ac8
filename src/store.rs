//! Persistence providers for commit sequences
//!
//! A [`LogStore`] keeps the commits and checkpoints of many tables. Its one
//! required synchronization primitive is [`LogStore::put_if_absent`], an atomic
//! "write version `v` only if `v` is the next free slot". The transaction log
//! builds its compare-and-swap append on top of it.
//!
//! ## File layout
//!
//! ```text
//! <root>/
//! ├── 6f1c…-…/
//! │   └── _log/
//! │       ├── 00000000000000000000.json
//! │       ├── 00000000000000000001.json
//! │       ├── 00000000000000000010.json
//! │       └── 00000000000000000010.checkpoint.json
//! └── 9a0e…-…/
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::commit::Commit;
use crate::error::{Result, TableError};
use crate::log::Checkpoint;
use crate::metadata::TableId;

/// Storage for per-table commit sequences and checkpoints
pub trait LogStore: Send + Sync {
    /// Atomically store `commit` at `commit.version`.
    ///
    /// Succeeds only when that version is the next free slot of the table's log
    /// (0 for a table with no commits). Returns `false` when another writer
    /// already took the slot or the log is not at `commit.version - 1`.
    fn put_if_absent(&self, table_id: TableId, commit: &Commit) -> Result<bool>;

    /// Get one commit
    fn get(&self, table_id: TableId, version: i64) -> Result<Option<Commit>>;

    /// All commits of a table, ascending by version
    fn list(&self, table_id: TableId) -> Result<Vec<Commit>>;

    /// Highest committed version, `None` if the table has no log
    fn latest_version(&self, table_id: TableId) -> Result<Option<i64>>;

    /// Every table with at least one commit
    fn tables(&self) -> Result<Vec<TableId>>;

    /// Store (or replace) a checkpoint
    fn put_checkpoint(&self, table_id: TableId, checkpoint: &Checkpoint) -> Result<()>;

    /// Versions that have a checkpoint, ascending
    fn checkpoint_versions(&self, table_id: TableId) -> Result<Vec<i64>>;

    fn get_checkpoint(&self, table_id: TableId, version: i64) -> Result<Option<Checkpoint>>;
}

#[derive(Debug, Default)]
struct TableLogData {
    commits: Vec<Commit>,
    checkpoints: BTreeMap<i64, Checkpoint>,
}

/// Store that keeps everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    tables: RwLock<HashMap<TableId, TableLogData>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for InMemoryLogStore {
    fn put_if_absent(&self, table_id: TableId, commit: &Commit) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let data = tables.entry(table_id).or_default();
        if commit.version != data.commits.len() as i64 {
            if data.commits.is_empty() {
                tables.remove(&table_id);
            }
            return Ok(false);
        }
        data.commits.push(commit.clone());
        Ok(true)
    }

    fn get(&self, table_id: TableId, version: i64) -> Result<Option<Commit>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables.get(&table_id).and_then(|data| {
            usize::try_from(version)
                .ok()
                .and_then(|index| data.commits.get(index).cloned())
        }))
    }

    fn list(&self, table_id: TableId) -> Result<Vec<Commit>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table_id)
            .map(|data| data.commits.clone())
            .unwrap_or_default())
    }

    fn latest_version(&self, table_id: TableId) -> Result<Option<i64>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table_id)
            .and_then(|data| data.commits.last().map(|c| c.version)))
    }

    fn tables(&self) -> Result<Vec<TableId>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<TableId> = tables
            .iter()
            .filter(|(_, data)| !data.commits.is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn put_checkpoint(&self, table_id: TableId, checkpoint: &Checkpoint) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let data = tables
            .get_mut(&table_id)
            .ok_or_else(|| TableError::TableNotFound(table_id.to_string()))?;
        data.checkpoints.insert(checkpoint.version, checkpoint.clone());
        Ok(())
    }

    fn checkpoint_versions(&self, table_id: TableId) -> Result<Vec<i64>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table_id)
            .map(|data| data.checkpoints.keys().copied().collect())
            .unwrap_or_default())
    }

    fn get_checkpoint(&self, table_id: TableId, version: i64) -> Result<Option<Checkpoint>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table_id)
            .and_then(|data| data.checkpoints.get(&version).cloned()))
    }
}

fn commit_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{20})\.json$").expect("valid commit file pattern"))
}

fn checkpoint_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{20})\.checkpoint\.json$").expect("valid checkpoint file pattern")
    })
}

/// Store that keeps one JSON file per commit under a root directory
#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    /// Open a store rooted at `path`, creating the directory if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_dir(&self, table_id: TableId) -> PathBuf {
        self.root.join(table_id.to_string()).join("_log")
    }

    fn commit_path(&self, table_id: TableId, version: i64) -> PathBuf {
        self.log_dir(table_id).join(format!("{:020}.json", version))
    }

    fn checkpoint_path(&self, table_id: TableId, version: i64) -> PathBuf {
        self.log_dir(table_id)
            .join(format!("{:020}.checkpoint.json", version))
    }

    /// Versions of the files in the log directory matching `pattern`, ascending
    fn scan_versions(&self, table_id: TableId, pattern: &Regex) -> Result<Vec<i64>> {
        let dir = self.log_dir(table_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(captures) = pattern.captures(name) {
                if let Ok(version) = captures[1].parse::<i64>() {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn write_temp(&self, dir: &Path, content: &[u8]) -> Result<PathBuf> {
        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(temp_path)
    }

    fn read_commit(path: &Path) -> Result<Option<Commit>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Best-effort removal of a temporary file once its content is linked or abandoned
fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove temporary file");
    }
}

impl LogStore for FileLogStore {
    fn put_if_absent(&self, table_id: TableId, commit: &Commit) -> Result<bool> {
        let dir = self.log_dir(table_id);
        if commit.version > 0 && !self.commit_path(table_id, commit.version - 1).exists() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;

        // Write the whole record aside, then link it into place: the link fails
        // if the version already exists and readers never see a partial file.
        let content = serde_json::to_vec_pretty(commit)?;
        let temp_path = self.write_temp(&dir, &content)?;
        let target = self.commit_path(table_id, commit.version);
        let linked = fs::hard_link(&temp_path, &target);
        discard_temp(&temp_path);

        match linked {
            Ok(()) => {
                debug!(
                    %table_id,
                    version = commit.version,
                    path = %target.display(),
                    "wrote commit file"
                );
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, table_id: TableId, version: i64) -> Result<Option<Commit>> {
        if version < 0 {
            return Ok(None);
        }
        Self::read_commit(&self.commit_path(table_id, version))
    }

    fn list(&self, table_id: TableId) -> Result<Vec<Commit>> {
        let mut commits = Vec::new();
        for version in self.scan_versions(table_id, commit_file_pattern())? {
            if let Some(commit) = Self::read_commit(&self.commit_path(table_id, version))? {
                commits.push(commit);
            }
        }
        Ok(commits)
    }

    fn latest_version(&self, table_id: TableId) -> Result<Option<i64>> {
        Ok(self
            .scan_versions(table_id, commit_file_pattern())?
            .last()
            .copied())
    }

    fn tables(&self) -> Result<Vec<TableId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            if self.latest_version(id)?.is_some() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn put_checkpoint(&self, table_id: TableId, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.log_dir(table_id);
        if !dir.exists() {
            return Err(TableError::TableNotFound(table_id.to_string()));
        }
        let content = serde_json::to_vec_pretty(checkpoint)?;
        let temp_path = self.write_temp(&dir, &content)?;
        fs::rename(&temp_path, self.checkpoint_path(table_id, checkpoint.version))?;
        Ok(())
    }

    fn checkpoint_versions(&self, table_id: TableId) -> Result<Vec<i64>> {
        self.scan_versions(table_id, checkpoint_file_pattern())
    }

    fn get_checkpoint(&self, table_id: TableId, version: i64) -> Result<Option<Checkpoint>> {
        match fs::read_to_string(self.checkpoint_path(table_id, version)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{AppendMetrics, Operation};
    use chrono::Utc;
    use tempfile::tempdir;

    fn append_commit(version: i64) -> Commit {
        Commit {
            version,
            timestamp: Utc::now(),
            operation: Operation::Append {
                metrics: AppendMetrics::default(),
            },
            read_version: Some(version - 1),
            is_blind_append: true,
            client_info: None,
        }
    }

    fn exercise_put_if_absent(store: &dyn LogStore) {
        let id = Uuid::new_v4();
        assert!(store.put_if_absent(id, &append_commit(0)).unwrap());
        assert!(!store.put_if_absent(id, &append_commit(0)).unwrap());
        // Gaps are refused.
        assert!(!store.put_if_absent(id, &append_commit(2)).unwrap());
        assert!(store.put_if_absent(id, &append_commit(1)).unwrap());

        assert_eq!(store.latest_version(id).unwrap(), Some(1));
        let versions: Vec<i64> = store.list(id).unwrap().iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![0, 1]);
        assert_eq!(store.tables().unwrap(), vec![id]);
        assert!(store.get(id, 5).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_put_if_absent() {
        exercise_put_if_absent(&InMemoryLogStore::new());
    }

    #[test]
    fn test_file_store_put_if_absent() {
        let dir = tempdir().unwrap();
        exercise_put_if_absent(&FileLogStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_failed_first_put_leaves_no_table() {
        let store = InMemoryLogStore::new();
        let id = Uuid::new_v4();
        assert!(!store.put_if_absent(id, &append_commit(1)).unwrap());
        assert!(store.tables().unwrap().is_empty());
        assert_eq!(store.latest_version(id).unwrap(), None);
    }

    #[test]
    fn test_file_store_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.put_if_absent(id, &append_commit(0)).unwrap();
        fs::write(store.log_dir(id).join("notes.txt"), "hello").unwrap();
        fs::create_dir_all(dir.path().join("not-a-table")).unwrap();

        assert_eq!(store.list(id).unwrap().len(), 1);
        assert_eq!(store.tables().unwrap(), vec![id]);
    }

    #[test]
    fn test_commits_leave_no_temporary_files() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        assert!(store.put_if_absent(id, &append_commit(0)).unwrap());
        assert!(!store.put_if_absent(id, &append_commit(0)).unwrap());

        let names: Vec<String> = fs::read_dir(store.log_dir(id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["00000000000000000000.json".to_string()]);
    }

    #[test]
    fn test_cleanup_failure_is_not_an_error() {
        let dir = tempdir().unwrap();
        // Removing a file that is already gone only logs.
        discard_temp(&dir.path().join(".missing.tmp"));
        assert!(dir.path().exists());
    }

    #[test]
    fn test_file_names_are_zero_padded() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        store.put_if_absent(id, &append_commit(0)).unwrap();
        assert!(store
            .log_dir(id)
            .join("00000000000000000000.json")
            .exists());
    }
}

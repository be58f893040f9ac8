//! Transaction log
//!
//! The append-only, strictly ordered commit sequence of one table. It is the
//! only writer of version numbers: [`TransactionLog::append`] succeeds only if
//! the caller's read version is still the newest version when the commit lands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::clock::Clock;
use crate::commit::{Commit, Operation};
use crate::error::{Result, TableError};
use crate::metadata::{TableId, TableMetadata};
use crate::store::LogStore;

/// Folded table state at one version, sealed with a checksum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: TableMetadata,
    pub checksum: Checksum,
}

impl Checkpoint {
    /// Check that the summary was not altered since it was written
    pub fn verify(&self) -> Result<()> {
        self.checksum.verify(&self.metadata)?;
        if self.metadata.version != self.version {
            return Err(TableError::validation(format!(
                "checkpoint {} holds metadata for version {}",
                self.version, self.metadata.version
            )));
        }
        Ok(())
    }
}

/// Handle returned when a checkpoint is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointToken {
    pub table_id: TableId,
    pub version: i64,
    pub checksum: Checksum,
}

/// Commit sequence of one table
#[derive(Clone)]
pub struct TransactionLog {
    table_id: TableId,
    store: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    checkpoint_interval: u64,
    client_info: Option<String>,
}

impl TransactionLog {
    pub fn new(table_id: TableId, store: Arc<dyn LogStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table_id,
            store,
            clock,
            checkpoint_interval: 0,
            client_info: None,
        }
    }

    /// Write a checkpoint automatically every `interval` versions (0 disables)
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Provenance string stamped on every commit
    pub fn with_client_info(mut self, client_info: Option<String>) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Newest committed version, `None` if the table does not exist
    pub fn current_version(&self) -> Result<Option<i64>> {
        self.store.latest_version(self.table_id)
    }

    fn require_current_version(&self) -> Result<i64> {
        self.current_version()?
            .ok_or_else(|| TableError::TableNotFound(self.table_id.to_string()))
    }

    /// Append one commit.
    ///
    /// `read_version` is the version the caller based the operation on, `None`
    /// for table creation. Fails with [`TableError::Conflict`] if another commit
    /// landed since; nothing is written in that case.
    pub fn append(&self, operation: Operation, read_version: Option<i64>) -> Result<Commit> {
        let is_create = matches!(operation, Operation::Create { .. });
        if is_create != read_version.is_none() {
            return Err(TableError::validation(if is_create {
                "CREATE must be committed without a read version"
            } else {
                "only CREATE may be committed without a read version"
            }));
        }

        let current = self.current_version()?;
        if read_version != current {
            if is_create {
                return Err(TableError::AlreadyExists(self.table_id.to_string()));
            }
            if current.is_none() {
                return Err(TableError::TableNotFound(self.table_id.to_string()));
            }
            return Err(self.conflict(read_version, current));
        }

        let version = current.map_or(0, |v| v + 1);
        let now = self.clock.now();
        let timestamp = match current {
            Some(previous) => match self.store.get(self.table_id, previous)? {
                Some(previous) => now.max(previous.timestamp),
                None => now,
            },
            None => now,
        };

        let commit = Commit {
            version,
            timestamp,
            is_blind_append: operation.is_blind_append(),
            operation,
            read_version,
            client_info: self.client_info.clone(),
        };

        if !self.store.put_if_absent(self.table_id, &commit)? {
            if is_create {
                return Err(TableError::AlreadyExists(self.table_id.to_string()));
            }
            return Err(self.conflict(read_version, self.current_version()?));
        }

        info!(
            table_id = %self.table_id,
            version,
            operation = commit.operation.name(),
            "committed"
        );

        if self.checkpoint_interval > 0
            && version > 0
            && version as u64 % self.checkpoint_interval == 0
        {
            // The commit is already durable here.
            if let Err(e) = self.checkpoint(version) {
                warn!(
                    table_id = %self.table_id,
                    version,
                    error = %e,
                    "automatic checkpoint failed"
                );
            }
        }

        Ok(commit)
    }

    fn conflict(&self, read_version: Option<i64>, current_version: Option<i64>) -> TableError {
        warn!(
            table_id = %self.table_id,
            ?read_version,
            ?current_version,
            "commit conflict"
        );
        TableError::Conflict {
            table_id: self.table_id.to_string(),
            read_version,
            current_version,
        }
    }

    /// Commits with versions in `[from, to]`, ascending. Open bounds are unbounded.
    pub fn history(&self, from: Option<i64>, to: Option<i64>) -> Result<Vec<Commit>> {
        self.require_current_version()?;
        let commits = self.store.list(self.table_id)?;
        Ok(commits
            .into_iter()
            .filter(|c| from.map_or(true, |from| c.version >= from))
            .filter(|c| to.map_or(true, |to| c.version <= to))
            .collect())
    }

    /// All committed versions, ascending
    pub fn versions(&self) -> Result<Vec<i64>> {
        Ok(self.history(None, None)?.iter().map(|c| c.version).collect())
    }

    /// Metadata at the newest version
    pub fn latest(&self) -> Result<TableMetadata> {
        let current = self.require_current_version()?;
        self.resolve_at_version(current)
    }

    /// Reconstruct the table as of `version`
    pub fn resolve_at_version(&self, version: i64) -> Result<TableMetadata> {
        let current = self.require_current_version()?;
        if version < 0 || version > current {
            return Err(TableError::NotFound(format!(
                "version {} of table {} (current version is {})",
                version, self.table_id, current
            )));
        }

        let (mut metadata, start) = match self.nearest_checkpoint(version)? {
            Some(checkpoint) => {
                debug!(
                    table_id = %self.table_id,
                    version,
                    checkpoint = checkpoint.version,
                    "replaying from checkpoint"
                );
                (checkpoint.metadata, checkpoint.version + 1)
            }
            None => {
                let create = self.load_commit(0)?;
                (TableMetadata::from_create(self.table_id, &create)?, 1)
            }
        };

        for v in start..=version {
            let commit = self.load_commit(v)?;
            metadata.apply(&commit)?;
        }
        Ok(metadata)
    }

    /// Reconstruct the table as of the newest commit at or before `timestamp`
    pub fn resolve_at_timestamp(&self, timestamp: DateTime<Utc>) -> Result<TableMetadata> {
        let commits = self.history(None, None)?;
        let version = commits
            .iter()
            .rev()
            .find(|c| c.timestamp <= timestamp)
            .map(|c| c.version)
            .ok_or_else(|| {
                TableError::NotFound(format!(
                    "no commit of table {} at or before {}",
                    self.table_id,
                    timestamp.to_rfc3339()
                ))
            })?;
        self.resolve_at_version(version)
    }

    /// Summarize commits `[0, version]` into one sealed record.
    ///
    /// Commits are kept, so results for every version are unchanged.
    pub fn checkpoint(&self, version: i64) -> Result<CheckpointToken> {
        let metadata = self.resolve_at_version(version)?;
        let checksum = Checksum::of(&metadata)?;
        let checkpoint = Checkpoint {
            version,
            created_at: self.clock.now(),
            metadata,
            checksum: checksum.clone(),
        };
        self.store.put_checkpoint(self.table_id, &checkpoint)?;
        info!(table_id = %self.table_id, version, %checksum, "wrote checkpoint");

        Ok(CheckpointToken {
            table_id: self.table_id,
            version,
            checksum,
        })
    }

    fn nearest_checkpoint(&self, version: i64) -> Result<Option<Checkpoint>> {
        let candidate = self
            .store
            .checkpoint_versions(self.table_id)?
            .into_iter()
            .filter(|v| *v <= version)
            .last();
        let Some(candidate) = candidate else {
            return Ok(None);
        };
        match self.store.get_checkpoint(self.table_id, candidate)? {
            Some(checkpoint) => {
                checkpoint.verify()?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    fn load_commit(&self, version: i64) -> Result<Commit> {
        self.store.get(self.table_id, version)?.ok_or_else(|| {
            TableError::NotFound(format!(
                "commit {} of table {} is missing from the log",
                version, self.table_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::commit::AppendMetrics;
    use crate::metadata::Protocol;
    use crate::schema::{DataType, Field, Schema};
    use crate::store::InMemoryLogStore;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn create_op() -> Operation {
        Operation::Create {
            name: "events".to_string(),
            schema: Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap(),
            partition_columns: Vec::new(),
            properties: BTreeMap::new(),
            format: "parquet".to_string(),
            protocol: Protocol::default(),
        }
    }

    fn append_op(rows: u64) -> Operation {
        Operation::Append {
            metrics: AppendMetrics {
                rows_written: rows,
                bytes_written: rows * 8,
                files_added: 1,
            },
        }
    }

    fn new_log() -> (TransactionLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let log = TransactionLog::new(
            Uuid::new_v4(),
            Arc::new(InMemoryLogStore::new()),
            clock.clone(),
        );
        (log, clock)
    }

    #[test]
    fn test_versions_are_contiguous() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        for read in 0..4 {
            let commit = log.append(append_op(10), Some(read)).unwrap();
            assert_eq!(commit.version, read + 1);
            assert!(commit.is_blind_append);
        }
        assert_eq!(log.versions().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(log.latest().unwrap().stats.num_rows, 40);
    }

    #[test]
    fn test_stale_read_version_conflicts() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        log.append(append_op(1), Some(0)).unwrap();

        let err = log.append(append_op(1), Some(0)).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(log.current_version().unwrap(), Some(1));
    }

    #[test]
    fn test_create_twice_fails() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        assert!(matches!(
            log.append(create_op(), None),
            Err(TableError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_append_to_missing_table() {
        let (log, _) = new_log();
        assert!(matches!(
            log.append(append_op(1), Some(0)),
            Err(TableError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let (log, clock) = new_log();
        let first = log.append(create_op(), None).unwrap();
        clock.advance(Duration::minutes(-5));
        let second = log.append(append_op(1), Some(0)).unwrap();
        assert_eq!(second.timestamp, first.timestamp);
    }

    #[test]
    fn test_resolve_bounds() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        assert!(matches!(log.resolve_at_version(-1), Err(TableError::NotFound(_))));
        assert!(matches!(log.resolve_at_version(1), Err(TableError::NotFound(_))));
        assert_eq!(log.resolve_at_version(0).unwrap().version, 0);
    }

    #[test]
    fn test_resolve_at_timestamp() {
        let (log, clock) = new_log();
        let created = log.append(create_op(), None).unwrap();
        clock.advance(Duration::hours(1));
        log.append(append_op(5), Some(0)).unwrap();
        clock.advance(Duration::hours(1));
        log.append(append_op(5), Some(1)).unwrap();

        let at = log
            .resolve_at_timestamp(created.timestamp + Duration::minutes(90))
            .unwrap();
        assert_eq!(at.version, 1);
        assert_eq!(at.stats.num_rows, 5);

        assert!(matches!(
            log.resolve_at_timestamp(created.timestamp - Duration::seconds(1)),
            Err(TableError::NotFound(_))
        ));
    }

    #[test]
    fn test_history_range() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        for read in 0..5 {
            log.append(append_op(1), Some(read)).unwrap();
        }
        let versions: Vec<i64> = log
            .history(Some(2), Some(4))
            .unwrap()
            .iter()
            .map(|c| c.version)
            .collect();
        assert_eq!(versions, vec![2, 3, 4]);
        assert_eq!(log.history(Some(3), None).unwrap().len(), 3);
    }

    #[test]
    fn test_checkpoint_preserves_resolution() {
        let (log, _) = new_log();
        log.append(create_op(), None).unwrap();
        for read in 0..6 {
            log.append(append_op(3), Some(read)).unwrap();
        }
        let before: Vec<TableMetadata> =
            (0..=6).map(|v| log.resolve_at_version(v).unwrap()).collect();

        let token = log.checkpoint(4).unwrap();
        assert_eq!(token.version, 4);

        let after: Vec<TableMetadata> =
            (0..=6).map(|v| log.resolve_at_version(v).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_automatic_checkpoint() {
        let store = Arc::new(InMemoryLogStore::new());
        let log = TransactionLog::new(
            Uuid::new_v4(),
            store.clone(),
            Arc::new(crate::clock::SystemClock),
        )
        .with_checkpoint_interval(2);
        log.append(create_op(), None).unwrap();
        for read in 0..4 {
            log.append(append_op(1), Some(read)).unwrap();
        }
        assert_eq!(store.checkpoint_versions(log.table_id()).unwrap(), vec![2, 4]);
    }
}

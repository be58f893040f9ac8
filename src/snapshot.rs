//! Read-only time travel over a table's log

use chrono::{DateTime, Utc};

use crate::commit::Commit;
use crate::error::Result;
use crate::log::TransactionLog;
use crate::metadata::{TableId, TableMetadata};

/// Resolves past states of one table.
///
/// Every resolution is a pure function of the log prefix it reads, so a
/// version that resolved once resolves to the same metadata forever.
#[derive(Clone)]
pub struct SnapshotResolver {
    log: TransactionLog,
}

impl SnapshotResolver {
    pub fn new(log: TransactionLog) -> Self {
        Self { log }
    }

    pub fn table_id(&self) -> TableId {
        self.log.table_id()
    }

    /// State after commit `version`
    pub fn at_version(&self, version: i64) -> Result<TableMetadata> {
        self.log.resolve_at_version(version)
    }

    /// State after the newest commit at or before `timestamp`
    pub fn at_timestamp(&self, timestamp: DateTime<Utc>) -> Result<TableMetadata> {
        self.log.resolve_at_timestamp(timestamp)
    }

    pub fn latest(&self) -> Result<TableMetadata> {
        self.log.latest()
    }

    pub fn available_versions(&self) -> Result<Vec<i64>> {
        self.log.versions()
    }

    pub fn history(&self, from: Option<i64>, to: Option<i64>) -> Result<Vec<Commit>> {
        self.log.history(from, to)
    }
}

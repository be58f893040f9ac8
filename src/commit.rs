//! Commit records and operation payloads
//!
//! Every mutation of a table is recorded as one immutable [`Commit`]. The
//! [`Operation`] carries the typed arguments and outcome counters of the
//! mutation; the flat key/value views used for history display are derived
//! from it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Protocol;
use crate::schema::Schema;

/// Counters for an append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendMetrics {
    pub rows_written: u64,
    pub bytes_written: u64,
    pub files_added: u64,
}

/// Counters for a copy-on-write update or delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteMetrics {
    /// Rows matched by the predicate (updated or deleted)
    pub rows_affected: u64,
    /// Unmatched rows copied into the replacement files
    pub rows_rewritten: u64,
    pub files_removed: u64,
    pub files_added: u64,
    pub bytes_removed: u64,
    pub bytes_added: u64,
}

/// Counters for a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMetrics {
    pub source_rows: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub rows_rewritten: u64,
    pub files_removed: u64,
    pub files_added: u64,
    pub bytes_removed: u64,
    pub bytes_added: u64,
}

/// Summary of a set of file sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSizeHistogram {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: u64,
    pub total: u64,
}

impl FileSizeHistogram {
    /// Histogram of `total` bytes spread as evenly as possible over `count` files
    pub fn uniform(count: u64, total: u64) -> Self {
        if count == 0 {
            return Self::default();
        }
        let min = total / count;
        let max = if total % count == 0 { min } else { min + 1 };
        Self {
            count,
            min,
            max,
            mean: min,
            total,
        }
    }
}

/// Counters for a compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeMetrics {
    pub files_removed: FileSizeHistogram,
    pub files_added: FileSizeHistogram,
}

/// Counters for a vacuum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumMetrics {
    pub files_deleted: u64,
    pub bytes_reclaimed: u64,
}

/// Net effect of one commit on the live file set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileActions {
    pub files_added: u64,
    pub files_removed: u64,
    pub bytes_added: u64,
    pub bytes_removed: u64,
    pub rows_added: u64,
    pub rows_removed: u64,
}

/// A table mutation with its arguments and outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Create {
        name: String,
        schema: Schema,
        #[serde(default)]
        partition_columns: Vec<String>,
        #[serde(default)]
        properties: BTreeMap<String, String>,
        format: String,
        protocol: Protocol,
    },
    Append {
        metrics: AppendMetrics,
    },
    Update {
        predicate: String,
        metrics: RewriteMetrics,
    },
    Delete {
        predicate: String,
        metrics: RewriteMetrics,
    },
    Merge {
        source: String,
        predicate: String,
        #[serde(default)]
        set_expressions: BTreeMap<String, String>,
        metrics: MergeMetrics,
    },
    Optimize {
        #[serde(default)]
        z_order_by: Vec<String>,
        metrics: OptimizeMetrics,
    },
    Vacuum {
        retention_hours: i64,
        /// Tombstones recorded at or before this version were purged
        vacuumed_through: i64,
        metrics: VacuumMetrics,
    },
    EvolveSchema {
        schema: Schema,
        allow_data_loss: bool,
    },
    SetProperties {
        #[serde(default)]
        set: BTreeMap<String, String>,
        #[serde(default)]
        unset: Vec<String>,
    },
}

impl Operation {
    /// Display name, as shown in table history
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "CREATE",
            Operation::Append { .. } => "APPEND",
            Operation::Update { .. } => "UPDATE",
            Operation::Delete { .. } => "DELETE",
            Operation::Merge { .. } => "MERGE",
            Operation::Optimize { .. } => "OPTIMIZE",
            Operation::Vacuum { .. } => "VACUUM",
            Operation::EvolveSchema { .. } => "EVOLVE SCHEMA",
            Operation::SetProperties { .. } => "SET PROPERTIES",
        }
    }

    /// Whether the operation never reads existing rows
    pub fn is_blind_append(&self) -> bool {
        matches!(self, Operation::Append { .. })
    }

    /// Schema recorded by this operation, if it replaces the running schema
    pub fn schema_snapshot(&self) -> Option<&Schema> {
        match self {
            Operation::Create { schema, .. } | Operation::EvolveSchema { schema, .. } => {
                Some(schema)
            }
            _ => None,
        }
    }

    /// Effect on the live file set
    pub fn file_actions(&self) -> FileActions {
        match self {
            Operation::Append { metrics } => FileActions {
                files_added: metrics.files_added,
                bytes_added: metrics.bytes_written,
                rows_added: metrics.rows_written,
                ..FileActions::default()
            },
            Operation::Update { metrics, .. } => FileActions {
                files_added: metrics.files_added,
                files_removed: metrics.files_removed,
                bytes_added: metrics.bytes_added,
                bytes_removed: metrics.bytes_removed,
                rows_added: metrics.rows_affected.saturating_add(metrics.rows_rewritten),
                rows_removed: metrics.rows_affected.saturating_add(metrics.rows_rewritten),
            },
            Operation::Delete { metrics, .. } => FileActions {
                files_added: metrics.files_added,
                files_removed: metrics.files_removed,
                bytes_added: metrics.bytes_added,
                bytes_removed: metrics.bytes_removed,
                rows_added: metrics.rows_rewritten,
                rows_removed: metrics.rows_affected.saturating_add(metrics.rows_rewritten),
            },
            Operation::Merge { metrics, .. } => FileActions {
                files_added: metrics.files_added,
                files_removed: metrics.files_removed,
                bytes_added: metrics.bytes_added,
                bytes_removed: metrics.bytes_removed,
                rows_added: metrics
                    .rows_inserted
                    .saturating_add(metrics.rows_updated)
                    .saturating_add(metrics.rows_rewritten),
                rows_removed: metrics
                    .rows_updated
                    .saturating_add(metrics.rows_deleted)
                    .saturating_add(metrics.rows_rewritten),
            },
            Operation::Optimize { metrics, .. } => FileActions {
                files_added: metrics.files_added.count,
                files_removed: metrics.files_removed.count,
                bytes_added: metrics.files_added.total,
                bytes_removed: metrics.files_removed.total,
                ..FileActions::default()
            },
            Operation::Create { .. }
            | Operation::Vacuum { .. }
            | Operation::EvolveSchema { .. }
            | Operation::SetProperties { .. } => FileActions::default(),
        }
    }

    /// Flat view of the operation's arguments
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        match self {
            Operation::Create {
                name,
                partition_columns,
                properties,
                format,
                ..
            } => {
                params.insert("name".to_string(), name.clone());
                params.insert("format".to_string(), format.clone());
                params.insert("partitionBy".to_string(), partition_columns.join(","));
                for (key, value) in properties {
                    params.insert(format!("properties.{}", key), value.clone());
                }
            }
            Operation::Append { .. } => {
                params.insert("mode".to_string(), "Append".to_string());
            }
            Operation::Update { predicate, .. } | Operation::Delete { predicate, .. } => {
                params.insert("predicate".to_string(), predicate.clone());
            }
            Operation::Merge {
                source,
                predicate,
                set_expressions,
                ..
            } => {
                params.insert("source".to_string(), source.clone());
                params.insert("predicate".to_string(), predicate.clone());
                for (column, expr) in set_expressions {
                    params.insert(format!("set.{}", column), expr.clone());
                }
            }
            Operation::Optimize { z_order_by, .. } => {
                params.insert("zOrderBy".to_string(), z_order_by.join(","));
            }
            Operation::Vacuum {
                retention_hours,
                vacuumed_through,
                ..
            } => {
                params.insert("retentionHours".to_string(), retention_hours.to_string());
                params.insert("vacuumedThrough".to_string(), vacuumed_through.to_string());
            }
            Operation::EvolveSchema { allow_data_loss, .. } => {
                params.insert("allowDataLoss".to_string(), allow_data_loss.to_string());
            }
            Operation::SetProperties { set, unset } => {
                for (key, value) in set {
                    params.insert(format!("set.{}", key), value.clone());
                }
                if !unset.is_empty() {
                    params.insert("unset".to_string(), unset.join(","));
                }
            }
        }
        params
    }

    /// Flat view of the operation's outcome counters
    pub fn metrics(&self) -> BTreeMap<String, u64> {
        let entries: Vec<(&str, u64)> = match self {
            Operation::Append { metrics } => vec![
                ("numOutputRows", metrics.rows_written),
                ("numOutputBytes", metrics.bytes_written),
                ("numFiles", metrics.files_added),
            ],
            Operation::Update { metrics, .. } => vec![
                ("numUpdatedRows", metrics.rows_affected),
                ("numCopiedRows", metrics.rows_rewritten),
                ("numRemovedFiles", metrics.files_removed),
                ("numAddedFiles", metrics.files_added),
            ],
            Operation::Delete { metrics, .. } => vec![
                ("numDeletedRows", metrics.rows_affected),
                ("numCopiedRows", metrics.rows_rewritten),
                ("numRemovedFiles", metrics.files_removed),
                ("numAddedFiles", metrics.files_added),
            ],
            Operation::Merge { metrics, .. } => vec![
                ("numSourceRows", metrics.source_rows),
                ("numTargetRowsInserted", metrics.rows_inserted),
                ("numTargetRowsUpdated", metrics.rows_updated),
                ("numTargetRowsDeleted", metrics.rows_deleted),
                ("numTargetRowsCopied", metrics.rows_rewritten),
                ("numTargetFilesRemoved", metrics.files_removed),
                ("numTargetFilesAdded", metrics.files_added),
            ],
            Operation::Optimize { metrics, .. } => vec![
                ("numRemovedFiles", metrics.files_removed.count),
                ("numRemovedBytes", metrics.files_removed.total),
                ("numAddedFiles", metrics.files_added.count),
                ("numAddedBytes", metrics.files_added.total),
                ("minFileSize", metrics.files_added.min),
                ("maxFileSize", metrics.files_added.max),
            ],
            Operation::Vacuum { metrics, .. } => vec![
                ("numDeletedFiles", metrics.files_deleted),
                ("numReclaimedBytes", metrics.bytes_reclaimed),
            ],
            Operation::Create { .. }
            | Operation::EvolveSchema { .. }
            | Operation::SetProperties { .. } => Vec::new(),
        };
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One immutable, versioned entry of a table's transaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Version produced by this commit
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    /// Version observed before committing; `None` for table creation
    pub read_version: Option<i64>,
    pub is_blind_append: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
}

impl Commit {
    /// Schema recorded in this commit, if any
    pub fn schema_snapshot(&self) -> Option<&Schema> {
        self.operation.schema_snapshot()
    }
}

//! Table metadata reconstructed from the log
//!
//! [`TableMetadata`] is never stored as ground truth: it is the fold of every
//! commit up to some version, rebuilt on each read (or resumed from a
//! checkpoint).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commit::{Commit, Operation};
use crate::error::{Result, TableError};
use crate::schema::Schema;

/// Stable table identifier
pub type TableId = Uuid;

/// Table property prefix that enables a writer feature
pub const FEATURE_PROPERTY_PREFIX: &str = "delta.feature.";

/// Protocol version that introduced named writer features
pub const FEATURES_WRITER_VERSION: i32 = 7;

/// Minimum reader/writer capabilities required to use the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub writer_features: BTreeSet<String>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: 1,
            min_writer_version: 2,
            writer_features: BTreeSet::new(),
        }
    }
}

impl Protocol {
    /// Enable a named writer feature, raising the writer version if needed
    pub fn enable_writer_feature(&mut self, feature: impl Into<String>) {
        self.writer_features.insert(feature.into());
        self.min_writer_version = self.min_writer_version.max(FEATURES_WRITER_VERSION);
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.writer_features.contains(feature)
    }
}

/// Live file and row counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub num_rows: u64,
    pub num_files: u64,
    pub size_bytes: u64,
}

impl TableStats {
    /// Mean live file size, zero for an empty table
    pub fn avg_file_size(&self) -> u64 {
        if self.num_files == 0 {
            0
        } else {
            self.size_bytes / self.num_files
        }
    }

    /// Mean rows per live file, zero for an empty table
    pub fn avg_rows_per_file(&self) -> u64 {
        if self.num_files == 0 {
            0
        } else {
            self.num_rows / self.num_files
        }
    }
}

/// Files logically removed by a commit and not yet vacuumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub files: u64,
    pub bytes: u64,
}

/// Logical state of a table as of one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub id: TableId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Storage format tag, e.g. "parquet"
    pub format: String,
    pub version: i64,
    pub protocol: Protocol,
    pub configuration: BTreeMap<String, String>,
    pub partition_columns: Vec<String>,
    pub schema: Schema,
    pub stats: TableStats,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

impl TableMetadata {
    /// Initial metadata from a table's version 0 commit
    pub fn from_create(id: TableId, commit: &Commit) -> Result<Self> {
        let Operation::Create {
            name,
            schema,
            partition_columns,
            properties,
            format,
            protocol,
        } = &commit.operation
        else {
            return Err(TableError::validation(format!(
                "table {} does not start with a CREATE commit",
                id
            )));
        };
        if commit.version != 0 {
            return Err(TableError::validation(format!(
                "table {} CREATE commit has version {}",
                id, commit.version
            )));
        }

        let mut metadata = Self {
            id,
            name: name.clone(),
            created_at: commit.timestamp,
            modified_at: commit.timestamp,
            format: format.clone(),
            version: 0,
            protocol: protocol.clone(),
            configuration: BTreeMap::new(),
            partition_columns: partition_columns.clone(),
            schema: schema.clone(),
            stats: TableStats::default(),
            tombstones: Vec::new(),
        };
        metadata.set_properties(properties, &[]);
        Ok(metadata)
    }

    /// Advance this snapshot by one commit
    pub fn apply(&mut self, commit: &Commit) -> Result<()> {
        if commit.version != self.version + 1 {
            return Err(TableError::validation(format!(
                "table {} cannot apply version {} on top of version {}",
                self.id, commit.version, self.version
            )));
        }

        match &commit.operation {
            Operation::Create { .. } => {
                return Err(TableError::validation(format!(
                    "table {} has a second CREATE commit at version {}",
                    self.id, commit.version
                )));
            }
            Operation::EvolveSchema { schema, .. } => {
                self.schema = schema.clone();
            }
            Operation::SetProperties { set, unset } => {
                self.set_properties(set, unset);
            }
            Operation::Vacuum { vacuumed_through, .. } => {
                self.tombstones.retain(|t| t.version > *vacuumed_through);
            }
            Operation::Append { .. }
            | Operation::Update { .. }
            | Operation::Delete { .. }
            | Operation::Merge { .. }
            | Operation::Optimize { .. } => {}
        }

        let actions = commit.operation.file_actions();
        let stats = &mut self.stats;
        stats.num_rows = stats
            .num_rows
            .saturating_add(actions.rows_added)
            .saturating_sub(actions.rows_removed);
        stats.num_files = stats
            .num_files
            .saturating_add(actions.files_added)
            .saturating_sub(actions.files_removed);
        stats.size_bytes = stats
            .size_bytes
            .saturating_add(actions.bytes_added)
            .saturating_sub(actions.bytes_removed);
        if actions.files_removed > 0 {
            self.tombstones.push(Tombstone {
                version: commit.version,
                timestamp: commit.timestamp,
                files: actions.files_removed,
                bytes: actions.bytes_removed,
            });
        }

        self.version = commit.version;
        self.modified_at = commit.timestamp;
        Ok(())
    }

    fn set_properties(&mut self, set: &BTreeMap<String, String>, unset: &[String]) {
        for key in unset {
            self.configuration.remove(key);
        }
        for (key, value) in set {
            if let Some(feature) = key.strip_prefix(FEATURE_PROPERTY_PREFIX) {
                if value.eq_ignore_ascii_case("supported")
                    || value.eq_ignore_ascii_case("enabled")
                {
                    self.protocol.enable_writer_feature(feature);
                }
            }
            self.configuration.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{AppendMetrics, RewriteMetrics, VacuumMetrics};
    use crate::schema::{DataType, Field};

    fn commit(version: i64, operation: Operation) -> Commit {
        Commit {
            version,
            timestamp: Utc::now(),
            is_blind_append: operation.is_blind_append(),
            operation,
            read_version: if version == 0 { None } else { Some(version - 1) },
            client_info: None,
        }
    }

    fn created() -> TableMetadata {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap();
        let create = commit(
            0,
            Operation::Create {
                name: "events".to_string(),
                schema,
                partition_columns: Vec::new(),
                properties: BTreeMap::from([("owner".to_string(), "data".to_string())]),
                format: "parquet".to_string(),
                protocol: Protocol::default(),
            },
        );
        TableMetadata::from_create(Uuid::new_v4(), &create).unwrap()
    }

    #[test]
    fn test_from_create() {
        let metadata = created();
        assert_eq!(metadata.version, 0);
        assert_eq!(metadata.configuration["owner"], "data");
        assert_eq!(metadata.stats, TableStats::default());
    }

    #[test]
    fn test_apply_requires_contiguous_versions() {
        let mut metadata = created();
        let skipped = commit(
            2,
            Operation::Append {
                metrics: AppendMetrics::default(),
            },
        );
        assert!(metadata.apply(&skipped).is_err());
        assert_eq!(metadata.version, 0);
    }

    #[test]
    fn test_delete_leaves_tombstone_until_vacuum() {
        let mut metadata = created();
        metadata
            .apply(&commit(
                1,
                Operation::Append {
                    metrics: AppendMetrics {
                        rows_written: 100,
                        bytes_written: 800,
                        files_added: 1,
                    },
                },
            ))
            .unwrap();
        metadata
            .apply(&commit(
                2,
                Operation::Delete {
                    predicate: "id < 10".to_string(),
                    metrics: RewriteMetrics {
                        rows_affected: 10,
                        rows_rewritten: 90,
                        files_removed: 1,
                        files_added: 1,
                        bytes_removed: 800,
                        bytes_added: 720,
                    },
                },
            ))
            .unwrap();
        assert_eq!(metadata.stats.num_rows, 90);
        assert_eq!(metadata.stats.size_bytes, 720);
        assert_eq!(metadata.tombstones.len(), 1);

        metadata
            .apply(&commit(
                3,
                Operation::Vacuum {
                    retention_hours: 0,
                    vacuumed_through: 2,
                    metrics: VacuumMetrics {
                        files_deleted: 1,
                        bytes_reclaimed: 800,
                    },
                },
            ))
            .unwrap();
        assert!(metadata.tombstones.is_empty());
    }

    #[test]
    fn test_feature_property_enables_writer_feature() {
        let mut metadata = created();
        metadata
            .apply(&commit(
                1,
                Operation::SetProperties {
                    set: BTreeMap::from([(
                        "delta.feature.changeDataFeed".to_string(),
                        "supported".to_string(),
                    )]),
                    unset: vec!["owner".to_string()],
                },
            ))
            .unwrap();
        assert!(metadata.protocol.supports("changeDataFeed"));
        assert_eq!(metadata.protocol.min_writer_version, FEATURES_WRITER_VERSION);
        assert!(!metadata.configuration.contains_key("owner"));
    }
}

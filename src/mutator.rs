//! Table mutations
//!
//! Every public operation follows the same template: read the newest snapshot,
//! validate the request against it, compute the operation's counters, then
//! append exactly one commit with the version that was read. A conflict is
//! returned to the caller unchanged; use [`retry_on_conflict`] to re-run the
//! whole operation against a fresh snapshot.
//!
//! Row data itself lives in the storage layer. Requests carry the row counts
//! that layer observed, and file counters are derived from the snapshot with a
//! copy-on-write model: a rewrite replaces every file holding an affected row.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::commit::{
    AppendMetrics, Commit, FileSizeHistogram, MergeMetrics, Operation, OptimizeMetrics,
    RewriteMetrics, VacuumMetrics,
};
use crate::compatibility;
use crate::config::TableLogConfig;
use crate::error::{Result, TableError};
use crate::log::{CheckpointToken, TransactionLog};
use crate::metadata::{Protocol, TableId, TableMetadata, TableStats};
use crate::schema::{field_key, Schema};
use crate::snapshot::SnapshotResolver;
use crate::store::LogStore;

/// Shared flag a caller sets to abandon a long-running operation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Arguments for creating a table
#[derive(Debug, Clone)]
pub struct CreateTable {
    pub name: String,
    pub schema: Schema,
    pub properties: BTreeMap<String, String>,
    pub partition_columns: Vec<String>,
    /// Storage format tag; the configured default when `None`
    pub format: Option<String>,
}

impl CreateTable {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            properties: BTreeMap::new(),
            partition_columns: Vec::new(),
            format: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_partition_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Arguments for an update or delete
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub predicate: String,
    /// Rows the storage layer matched with the predicate
    pub rows_matched: u64,
}

impl RewriteRequest {
    pub fn new(predicate: impl Into<String>, rows_matched: u64) -> Self {
        Self {
            predicate: predicate.into(),
            rows_matched,
        }
    }
}

/// What happens to target rows matched by a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchedAction {
    #[default]
    Update,
    Delete,
}

/// Arguments for a merge of `source` into the target table
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source: TableId,
    pub predicate: String,
    /// Target column to expression assignments for matched rows
    pub set_expressions: BTreeMap<String, String>,
    /// Source rows that matched a target row; the rest are inserted
    pub rows_matched: u64,
    pub when_matched: MatchedAction,
}

/// Arguments for a compaction
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub z_order_by: Vec<String>,
    pub cancel: CancellationToken,
}

/// Arguments for a vacuum
#[derive(Debug, Clone)]
pub struct VacuumOptions {
    pub retention: Duration,
    /// Accept a retention below the configured floor
    pub force: bool,
    /// Compute what would be deleted without committing
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

impl VacuumOptions {
    pub fn retain(retention: Duration) -> Self {
        Self {
            retention,
            force: false,
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of a vacuum; `commit` is `None` for a dry run
#[derive(Debug, Clone)]
pub struct VacuumReport {
    pub metrics: VacuumMetrics,
    pub commit: Option<Commit>,
}

/// Tunables applied to every mutation
#[derive(Debug, Clone)]
pub struct MutatorSettings {
    pub min_retention: Duration,
    pub retention_check_enabled: bool,
    pub checkpoint_interval: u64,
    pub client_info: Option<String>,
    pub default_format: String,
    pub target_file_size: u64,
}

impl Default for MutatorSettings {
    fn default() -> Self {
        Self::from(&TableLogConfig::default())
    }
}

impl From<&TableLogConfig> for MutatorSettings {
    fn from(config: &TableLogConfig) -> Self {
        Self {
            min_retention: Duration::hours(config.retention.minimum_hours),
            retention_check_enabled: config.retention.check_enabled,
            checkpoint_interval: config.checkpoint.interval,
            client_info: config.commit.client_info.clone(),
            default_format: config.table.default_format.clone(),
            target_file_size: config.table.target_file_size.max(1),
        }
    }
}

/// Entry point for all table mutations
#[derive(Clone)]
pub struct TableMutator {
    store: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    settings: MutatorSettings,
}

impl TableMutator {
    /// Mutator over `store` with default settings and the system clock
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn LogStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            settings: MutatorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: MutatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &MutatorSettings {
        &self.settings
    }

    /// Transaction log of one table
    pub fn log(&self, table_id: TableId) -> TransactionLog {
        TransactionLog::new(table_id, self.store.clone(), self.clock.clone())
            .with_checkpoint_interval(self.settings.checkpoint_interval)
            .with_client_info(self.settings.client_info.clone())
    }

    /// Read-only view of one table's history
    pub fn snapshots(&self, table_id: TableId) -> SnapshotResolver {
        SnapshotResolver::new(self.log(table_id))
    }

    /// Newest metadata of every table in the store
    pub fn list_tables(&self) -> Result<Vec<TableMetadata>> {
        self.store
            .tables()?
            .into_iter()
            .map(|id| self.log(id).latest())
            .collect()
    }

    /// Create a table at version 0
    pub fn create_table(&self, request: CreateTable) -> Result<TableMetadata> {
        if request.name.trim().is_empty() {
            return Err(TableError::validation("table name is empty"));
        }
        validate_partition_columns(&request.schema, &request.partition_columns)?;

        let table_id = TableId::new_v4();
        let log = self.log(table_id);
        let commit = log.append(
            Operation::Create {
                name: request.name,
                schema: request.schema,
                partition_columns: request.partition_columns,
                properties: request.properties,
                format: request
                    .format
                    .unwrap_or_else(|| self.settings.default_format.clone()),
                protocol: Protocol::default(),
            },
            None,
        )?;
        TableMetadata::from_create(table_id, &commit)
    }

    /// Record `row_count` rows written by the storage layer
    pub fn append_rows(&self, table_id: TableId, row_count: u64) -> Result<Commit> {
        let log = self.log(table_id);
        let snapshot = log.latest()?;

        let metrics = AppendMetrics {
            rows_written: row_count,
            bytes_written: row_count.saturating_mul(snapshot.schema.estimated_row_width()),
            files_added: u64::from(row_count > 0),
        };
        debug!(%table_id, rows = row_count, bytes = metrics.bytes_written, "appending rows");
        log.append(Operation::Append { metrics }, Some(snapshot.version))
    }

    /// Rewrite the rows matching a predicate
    pub fn update(&self, table_id: TableId, request: RewriteRequest) -> Result<Commit> {
        let log = self.log(table_id);
        let snapshot = log.latest()?;
        validate_rewrite(&snapshot, &request)?;

        let plan = RewritePlan::for_rows(&snapshot.stats, request.rows_matched);
        let metrics = RewriteMetrics {
            rows_affected: request.rows_matched,
            rows_rewritten: plan.rows - request.rows_matched,
            files_removed: plan.files,
            files_added: plan.files,
            bytes_removed: plan.bytes,
            bytes_added: plan.bytes,
        };
        log.append(
            Operation::Update {
                predicate: request.predicate,
                metrics,
            },
            Some(snapshot.version),
        )
    }

    /// Remove the rows matching a predicate
    pub fn delete(&self, table_id: TableId, request: RewriteRequest) -> Result<Commit> {
        let log = self.log(table_id);
        let snapshot = log.latest()?;
        validate_rewrite(&snapshot, &request)?;

        let plan = RewritePlan::for_rows(&snapshot.stats, request.rows_matched);
        let survivors = plan.rows - request.rows_matched;
        let metrics = RewriteMetrics {
            rows_affected: request.rows_matched,
            rows_rewritten: survivors,
            files_removed: plan.files,
            files_added: if survivors > 0 { plan.files } else { 0 },
            bytes_removed: plan.bytes,
            bytes_added: plan.bytes_for(survivors),
        };
        log.append(
            Operation::Delete {
                predicate: request.predicate,
                metrics,
            },
            Some(snapshot.version),
        )
    }

    /// Upsert the rows of `request.source` into `target`
    pub fn merge(&self, target: TableId, request: MergeRequest) -> Result<Commit> {
        let log = self.log(target);
        let snapshot = log.latest()?;
        let source = self.log(request.source).latest()?;

        if request.predicate.trim().is_empty() {
            return Err(TableError::validation("merge requires a match predicate"));
        }
        for column in request.set_expressions.keys() {
            if !snapshot.schema.contains(column) {
                return Err(TableError::validation(format!(
                    "merge assigns unknown column '{}'",
                    column
                )));
            }
        }
        let source_rows = source.stats.num_rows;
        if request.rows_matched > source_rows {
            return Err(TableError::validation(format!(
                "merge matched {} rows but the source has {}",
                request.rows_matched, source_rows
            )));
        }
        if request.rows_matched > snapshot.stats.num_rows {
            return Err(TableError::validation(format!(
                "merge matched {} rows but the target has {}",
                request.rows_matched, snapshot.stats.num_rows
            )));
        }

        let rows_inserted = source_rows - request.rows_matched;
        let (rows_updated, rows_deleted) = match request.when_matched {
            MatchedAction::Update => (request.rows_matched, 0),
            MatchedAction::Delete => (0, request.rows_matched),
        };

        let plan = RewritePlan::for_rows(&snapshot.stats, request.rows_matched);
        let rows_rewritten = plan.rows - request.rows_matched;
        let kept_rows = plan.rows - rows_deleted;
        let rewritten_files = if kept_rows > 0 { plan.files } else { 0 };
        let insert_bytes = rows_inserted.saturating_mul(snapshot.schema.estimated_row_width());

        let metrics = MergeMetrics {
            source_rows,
            rows_inserted,
            rows_updated,
            rows_deleted,
            rows_rewritten,
            files_removed: plan.files,
            files_added: rewritten_files + u64::from(rows_inserted > 0),
            bytes_removed: plan.bytes,
            bytes_added: plan.bytes_for(kept_rows).saturating_add(insert_bytes),
        };
        log.append(
            Operation::Merge {
                source: request.source.to_string(),
                predicate: request.predicate,
                set_expressions: request.set_expressions,
                metrics,
            },
            Some(snapshot.version),
        )
    }

    /// Compact the live files, optionally clustering by Z-order columns
    pub fn optimize(&self, table_id: TableId, options: OptimizeOptions) -> Result<Commit> {
        let log = self.log(table_id);
        let snapshot = log.latest()?;

        let mut seen = HashSet::new();
        for column in &options.z_order_by {
            let field = snapshot.schema.field(column).ok_or_else(|| {
                TableError::validation(format!("cannot Z-order by unknown column '{}'", column))
            })?;
            if field.data_type.is_nested() {
                return Err(TableError::validation(format!(
                    "cannot Z-order by nested column '{}'",
                    column
                )));
            }
            if is_partition_column(&snapshot, column) {
                return Err(TableError::validation(format!(
                    "cannot Z-order by partition column '{}'",
                    column
                )));
            }
            if !seen.insert(field_key(column)) {
                return Err(TableError::validation(format!(
                    "Z-order column '{}' listed twice",
                    column
                )));
            }
        }

        let stats = snapshot.stats;
        let target_files = stats
            .size_bytes
            .div_ceil(self.settings.target_file_size.max(1))
            .max(u64::from(stats.num_files > 0));
        // Already compact: only a clustering request rewrites the files.
        let rewrite = stats.num_files > 0
            && (stats.num_files > target_files || !options.z_order_by.is_empty());

        let metrics = if rewrite {
            OptimizeMetrics {
                files_removed: FileSizeHistogram::uniform(stats.num_files, stats.size_bytes),
                files_added: FileSizeHistogram::uniform(target_files, stats.size_bytes),
            }
        } else {
            OptimizeMetrics::default()
        };

        if options.cancel.is_cancelled() {
            info!(%table_id, "optimize cancelled before commit");
            return Err(TableError::Cancelled("optimize".to_string()));
        }
        log.append(
            Operation::Optimize {
                z_order_by: options.z_order_by,
                metrics,
            },
            Some(snapshot.version),
        )
    }

    /// Purge files removed longer than `retention` ago
    pub fn vacuum(&self, table_id: TableId, options: VacuumOptions) -> Result<VacuumReport> {
        if options.retention < Duration::zero() {
            return Err(TableError::validation("vacuum retention cannot be negative"));
        }
        if self.settings.retention_check_enabled
            && !options.force
            && options.retention < self.settings.min_retention
        {
            return Err(TableError::RetentionViolation {
                requested_hours: options.retention.num_hours(),
                minimum_hours: self.settings.min_retention.num_hours(),
            });
        }
        if options.force && options.retention < self.settings.min_retention {
            warn!(
                %table_id,
                retention_hours = options.retention.num_hours(),
                "vacuum forced below the retention floor"
            );
        }

        let log = self.log(table_id);
        let snapshot = log.latest()?;
        let cutoff = self.clock.now() - options.retention;

        let expired: Vec<_> = snapshot
            .tombstones
            .iter()
            .filter(|t| t.timestamp < cutoff)
            .collect();
        let metrics = VacuumMetrics {
            files_deleted: expired.iter().fold(0u64, |n, t| n.saturating_add(t.files)),
            bytes_reclaimed: expired.iter().fold(0u64, |n, t| n.saturating_add(t.bytes)),
        };
        let vacuumed_through = expired.iter().map(|t| t.version).max().unwrap_or(-1);

        if options.dry_run {
            info!(
                %table_id,
                files = metrics.files_deleted,
                bytes = metrics.bytes_reclaimed,
                "vacuum dry run"
            );
            return Ok(VacuumReport {
                metrics,
                commit: None,
            });
        }
        if options.cancel.is_cancelled() {
            info!(%table_id, "vacuum cancelled before commit");
            return Err(TableError::Cancelled("vacuum".to_string()));
        }

        let commit = log.append(
            Operation::Vacuum {
                retention_hours: options.retention.num_hours(),
                vacuumed_through,
                metrics,
            },
            Some(snapshot.version),
        )?;
        Ok(VacuumReport {
            metrics,
            commit: Some(commit),
        })
    }

    /// Replace the table schema
    pub fn evolve_schema(
        &self,
        table_id: TableId,
        new_schema: Schema,
        allow_data_loss: bool,
    ) -> Result<Commit> {
        let log = self.log(table_id);
        let snapshot = log.latest()?;

        for column in &snapshot.partition_columns {
            let old = snapshot.schema.field(column);
            let new = new_schema.field(column);
            match (old, new) {
                (Some(old), Some(new)) if old.data_type == new.data_type => {}
                _ => {
                    return Err(TableError::validation(format!(
                        "partition column '{}' cannot be removed or retyped",
                        column
                    )));
                }
            }
        }

        let diff = compatibility::diff(&snapshot.schema, &new_schema);
        if !diff.is_backward_compatible {
            if !allow_data_loss {
                return Err(TableError::SchemaIncompatible {
                    issues: diff.compatibility_issues,
                });
            }
            warn!(
                %table_id,
                issues = diff.compatibility_issues.len(),
                "applying breaking schema change"
            );
        }

        log.append(
            Operation::EvolveSchema {
                schema: new_schema,
                allow_data_loss,
            },
            Some(snapshot.version),
        )
    }

    /// Set and remove table properties
    pub fn set_properties(
        &self,
        table_id: TableId,
        set: BTreeMap<String, String>,
        unset: Vec<String>,
    ) -> Result<Commit> {
        if set.is_empty() && unset.is_empty() {
            return Err(TableError::validation("no properties to set or unset"));
        }
        if let Some(key) = set.keys().chain(unset.iter()).find(|k| k.trim().is_empty()) {
            return Err(TableError::validation(format!("invalid property key '{}'", key)));
        }

        let log = self.log(table_id);
        let snapshot = log.latest()?;
        for key in &unset {
            if !snapshot.configuration.contains_key(key) {
                return Err(TableError::NotFound(format!("property '{}'", key)));
            }
        }
        log.append(Operation::SetProperties { set, unset }, Some(snapshot.version))
    }

    /// Seal the table state at `version`
    pub fn checkpoint(&self, table_id: TableId, version: i64) -> Result<CheckpointToken> {
        self.log(table_id).checkpoint(version)
    }

    pub fn read_at_version(&self, table_id: TableId, version: i64) -> Result<TableMetadata> {
        self.snapshots(table_id).at_version(version)
    }

    pub fn read_at_timestamp(
        &self,
        table_id: TableId,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<TableMetadata> {
        self.snapshots(table_id).at_timestamp(timestamp)
    }

    pub fn history(
        &self,
        table_id: TableId,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<Commit>> {
        self.snapshots(table_id).history(from, to)
    }
}

/// Re-run `operation` while it fails with a commit conflict.
///
/// The closure must re-read and re-validate against the newest snapshot on
/// every call. After `max_retries` retries the conflict is reported as
/// [`TableError::RetriesExhausted`]; other errors are returned at once.
pub fn retry_on_conflict<T, F>(max_retries: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation() {
            Err(e) if e.is_conflict() => {
                if attempts > max_retries {
                    warn!(attempts, "giving up after repeated commit conflicts");
                    return Err(TableError::RetriesExhausted { attempts });
                }
                debug!(attempts, error = %e, "retrying after commit conflict");
            }
            other => return other,
        }
    }
}

/// Files, rows and bytes a copy-on-write rewrite has to touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RewritePlan {
    files: u64,
    rows: u64,
    bytes: u64,
}

impl RewritePlan {
    fn for_rows(stats: &TableStats, affected: u64) -> Self {
        if affected == 0 || stats.num_files == 0 || stats.num_rows == 0 {
            return Self {
                files: 0,
                rows: 0,
                bytes: 0,
            };
        }
        let rows_per_file = stats.avg_rows_per_file().max(1);
        let files = affected.div_ceil(rows_per_file).min(stats.num_files);
        if files == stats.num_files {
            return Self {
                files,
                rows: stats.num_rows,
                bytes: stats.size_bytes,
            };
        }
        Self {
            files,
            rows: files.saturating_mul(rows_per_file).max(affected).min(stats.num_rows),
            bytes: files.saturating_mul(stats.avg_file_size()),
        }
    }

    /// Bytes of `rows` rows at the touched files' density
    fn bytes_for(&self, rows: u64) -> u64 {
        if self.rows == 0 {
            0
        } else {
            let scaled = u128::from(self.bytes) * u128::from(rows) / u128::from(self.rows);
            u64::try_from(scaled).unwrap_or(u64::MAX)
        }
    }
}

fn validate_rewrite(snapshot: &TableMetadata, request: &RewriteRequest) -> Result<()> {
    if request.predicate.trim().is_empty() {
        return Err(TableError::validation("a predicate is required"));
    }
    if request.rows_matched > snapshot.stats.num_rows {
        return Err(TableError::validation(format!(
            "predicate matched {} rows but the table has {}",
            request.rows_matched, snapshot.stats.num_rows
        )));
    }
    Ok(())
}

fn is_partition_column(snapshot: &TableMetadata, column: &str) -> bool {
    let key = field_key(column);
    snapshot
        .partition_columns
        .iter()
        .any(|p| field_key(p) == key)
}

fn validate_partition_columns(schema: &Schema, columns: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        let field = schema.field(column).ok_or_else(|| {
            TableError::validation(format!("partition column '{}' is not in the schema", column))
        })?;
        if field.data_type.is_nested() {
            return Err(TableError::validation(format!(
                "partition column '{}' must be a primitive type",
                column
            )));
        }
        if !seen.insert(field_key(column)) {
            return Err(TableError::validation(format!(
                "partition column '{}' listed twice",
                column
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schema::{DataType, Field};
    use crate::store::InMemoryLogStore;
    use chrono::Utc;

    fn people() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::String, true),
        ])
        .unwrap()
    }

    fn mutator() -> (TableMutator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mutator = TableMutator::with_clock(Arc::new(InMemoryLogStore::new()), clock.clone());
        (mutator, clock)
    }

    #[test]
    fn test_rewrite_plan_scales_with_affected_rows() {
        let stats = TableStats {
            num_rows: 1000,
            num_files: 10,
            size_bytes: 10_000,
        };
        let plan = RewritePlan::for_rows(&stats, 150);
        assert_eq!(plan, RewritePlan { files: 2, rows: 200, bytes: 2000 });
        assert_eq!(plan.bytes_for(50), 500);

        let all = RewritePlan::for_rows(&stats, 1000);
        assert_eq!(all, RewritePlan { files: 10, rows: 1000, bytes: 10_000 });

        assert_eq!(RewritePlan::for_rows(&stats, 0).files, 0);
    }

    #[test]
    fn test_append_records_row_count() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        let commit = mutator.append_rows(table.id, 100).unwrap();
        assert_eq!(commit.version, 1);
        assert!(commit.is_blind_append);
        let Operation::Append { metrics } = commit.operation else {
            panic!("expected append, got {:?}", commit.operation);
        };
        assert_eq!(metrics.rows_written, 100);
        assert_eq!(metrics.bytes_written, 100 * 24);
    }

    #[test]
    fn test_huge_row_counts_saturate() {
        let (mutator, _) = mutator();
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap();
        let table = mutator.create_table(CreateTable::new("wide", schema)).unwrap();

        let commit = mutator.append_rows(table.id, u64::MAX / 4).unwrap();
        let Operation::Append { metrics } = commit.operation else {
            panic!("expected append, got {:?}", commit.operation);
        };
        assert_eq!(metrics.bytes_written, u64::MAX);

        mutator.append_rows(table.id, u64::MAX / 4).unwrap();
        mutator.delete(table.id, RewriteRequest::new("id = 1", 1)).unwrap();
        let latest = mutator.log(table.id).latest().unwrap();
        assert_eq!(latest.stats.num_rows, u64::MAX / 4 * 2 - 1);
    }

    #[test]
    fn test_delete_requires_predicate() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        mutator.append_rows(table.id, 10).unwrap();
        let err = mutator
            .delete(table.id, RewriteRequest::new("  ", 1))
            .unwrap_err();
        assert!(matches!(err, TableError::Validation(_)));
        assert_eq!(mutator.log(table.id).current_version().unwrap(), Some(1));
    }

    #[test]
    fn test_delete_all_rows_leaves_no_files() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        mutator.append_rows(table.id, 10).unwrap();
        mutator.delete(table.id, RewriteRequest::new("true", 10)).unwrap();
        let latest = mutator.log(table.id).latest().unwrap();
        assert_eq!(latest.stats, TableStats::default());
        assert_eq!(latest.tombstones.len(), 1);
    }

    #[test]
    fn test_partition_columns_are_validated() {
        let (mutator, _) = mutator();
        let request = CreateTable::new("people", people()).with_partition_columns(["region"]);
        assert!(matches!(
            mutator.create_table(request),
            Err(TableError::Validation(_))
        ));
    }

    #[test]
    fn test_partition_column_cannot_be_dropped_even_with_data_loss() {
        let (mutator, _) = mutator();
        let table = mutator
            .create_table(CreateTable::new("people", people()).with_partition_columns(["name"]))
            .unwrap();
        let without_name = Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap();
        assert!(matches!(
            mutator.evolve_schema(table.id, without_name, true),
            Err(TableError::Validation(_))
        ));
    }

    #[test]
    fn test_optimize_compacts_small_files() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        for _ in 0..4 {
            mutator.append_rows(table.id, 100).unwrap();
        }
        let commit = mutator.optimize(table.id, OptimizeOptions::default()).unwrap();
        let Operation::Optimize { metrics, .. } = commit.operation else {
            panic!("expected optimize");
        };
        assert_eq!(metrics.files_removed.count, 4);
        assert_eq!(metrics.files_added.count, 1);
        assert_eq!(metrics.files_added.total, 4 * 100 * 24);

        let latest = mutator.log(table.id).latest().unwrap();
        assert_eq!(latest.stats.num_files, 1);
        assert_eq!(latest.stats.num_rows, 400);
    }

    #[test]
    fn test_optimize_rejects_unknown_z_order_column() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        let options = OptimizeOptions {
            z_order_by: vec!["missing".to_string()],
            ..OptimizeOptions::default()
        };
        assert!(mutator.optimize(table.id, options).is_err());
    }

    #[test]
    fn test_cancelled_optimize_commits_nothing() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        let options = OptimizeOptions::default();
        options.cancel.cancel();
        assert!(matches!(
            mutator.optimize(table.id, options),
            Err(TableError::Cancelled(_))
        ));
        assert_eq!(mutator.log(table.id).current_version().unwrap(), Some(0));
    }

    #[test]
    fn test_cancelled_vacuum_commits_nothing() {
        let (mutator, clock) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        mutator.append_rows(table.id, 10).unwrap();
        mutator.delete(table.id, RewriteRequest::new("true", 10)).unwrap();
        clock.advance(Duration::hours(200));

        let options = VacuumOptions::retain(Duration::hours(168));
        options.cancel.cancel();
        assert!(matches!(
            mutator.vacuum(table.id, options),
            Err(TableError::Cancelled(_))
        ));
        let latest = mutator.log(table.id).latest().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.tombstones.len(), 1);
    }

    #[test]
    fn test_required_column_needs_data_loss_flag() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        let required_name = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::String, false),
        ])
        .unwrap();

        let err = mutator
            .evolve_schema(table.id, required_name.clone(), false)
            .unwrap_err();
        match err {
            TableError::SchemaIncompatible { issues } => {
                assert_eq!(
                    issues,
                    vec!["Field 'name' changed from nullable to non-nullable".to_string()]
                );
            }
            other => panic!("expected SchemaIncompatible, got {:?}", other),
        }
        assert_eq!(mutator.log(table.id).current_version().unwrap(), Some(0));

        let commit = mutator.evolve_schema(table.id, required_name, true).unwrap();
        assert_eq!(commit.version, 1);
        let latest = mutator.log(table.id).latest().unwrap();
        assert!(!latest.schema.field("name").unwrap().nullable);
    }

    #[test]
    fn test_retry_gives_up_after_bound() {
        let mut calls = 0;
        let result: Result<()> = retry_on_conflict(2, || {
            calls += 1;
            Err(TableError::Conflict {
                table_id: "t".to_string(),
                read_version: Some(1),
                current_version: Some(2),
            })
        });
        assert!(matches!(result, Err(TableError::RetriesExhausted { attempts: 3 })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: Result<()> = retry_on_conflict(5, || {
            calls += 1;
            Err(TableError::validation("bad"))
        });
        assert!(matches!(result, Err(TableError::Validation(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_set_properties_unknown_unset() {
        let (mutator, _) = mutator();
        let table = mutator.create_table(CreateTable::new("people", people())).unwrap();
        assert!(matches!(
            mutator.set_properties(table.id, BTreeMap::new(), vec!["missing".to_string()]),
            Err(TableError::NotFound(_))
        ));
    }
}

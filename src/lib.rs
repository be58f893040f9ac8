//! Table Log
//!
//! A versioned, append-only transaction log and schema evolution engine for
//! columnar data tables.
//!
//! ## Features
//!
//! - **Optimistic Concurrency**: Commits land only if the version they read is still current
//! - **Time Travel**: Any past version reconstructs from the commits up to it
//! - **Schema Evolution**: Widening promotions pass, breaking changes are rejected
//! - **Checkpoints**: SHA256-sealed summaries speed up replay without deleting history
//! - **Vacuum Safety**: Removed files are purged only after a retention floor
//!
//! ## Architecture
//!
//! ```text
//! tables/
//! ├── 1f0c…e2/
//! │   └── _log/
//! │       ├── 00000000000000000000.json
//! │       ├── 00000000000000000001.json
//! │       ├── 00000000000000000010.json
//! │       └── 00000000000000000010.checkpoint.json
//! └── 7a4d…91/
//! ```

pub mod checksum;
pub mod clock;
pub mod commit;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod log;
pub mod metadata;
pub mod mutator;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use checksum::Checksum;
pub use clock::{Clock, ManualClock, SystemClock};
pub use commit::{Commit, Operation};
pub use compatibility::{diff, is_compatible, merge, render_text_diff, SchemaDiff};
pub use config::TableLogConfig;
pub use error::{Result, TableError};
pub use log::{Checkpoint, CheckpointToken, TransactionLog};
pub use metadata::{Protocol, TableId, TableMetadata, TableStats};
pub use mutator::{
    retry_on_conflict, CancellationToken, CreateTable, MatchedAction, MergeRequest,
    OptimizeOptions, RewriteRequest, TableMutator, VacuumOptions, VacuumReport,
};
pub use schema::{DataType, Field, Schema};
pub use snapshot::SnapshotResolver;
pub use store::{FileLogStore, InMemoryLogStore, LogStore};

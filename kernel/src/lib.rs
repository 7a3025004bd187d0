//! Scan planning core for Floe tables.
//!
//! Floe layers snapshotted, ACID-style tables over immutable files in object storage. This crate
//! implements the planning half of a read: given a table's current metadata, a time-travel
//! selector, a row predicate, and a column projection, it produces a stream of
//! [`CombinedScanTask`]s (byte-range assignments grouped to balance worker load) that an
//! execution engine consumes to actually read rows.
//!
//! The flow is: resolve a [`Snapshot`] from [`TableMetadata`], prune whole manifests with their
//! partition summaries, expand surviving manifests (optionally on a shared worker pool) into
//! per-file [`FileScanTask`]s carrying a residual predicate, then split and bin-pack those tasks.
//! Start with [`TableScan`].
//!
//! This crate plans reads; it never executes them and never mutates table state. The columnar
//! file readers and the catalog's commit protocol are external collaborators reached through the
//! [`TableOperations`] and [`FileIO`] seams.
//!
//! [`CombinedScanTask`]: crate::scan::CombinedScanTask
//! [`FileScanTask`]: crate::scan::FileScanTask

pub mod error;
pub mod events;
pub mod expressions;
pub mod io;
pub mod iter;
pub mod manifest;
pub mod metadata;
pub mod partition;
pub mod predicates;
pub mod scan;
pub mod schema;
pub(crate) mod utils;

pub use error::{Error, FloeResult};
pub use io::FileIO;
pub use metadata::{Snapshot, TableMetadata, TableOperations};
pub use scan::TableScan;
pub use schema::{Schema, SchemaRef};

/// Identifies one snapshot of a table.
pub type SnapshotId = i64;

/// Identifies one field of a table schema. Field ids are stable across renames, which is why
/// projection and predicate binding both resolve names down to ids before planning proceeds.
pub type FieldId = i32;

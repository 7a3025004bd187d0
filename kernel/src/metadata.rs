//! In-memory representation of table metadata: the current schema, partition specs, snapshots,
//! the snapshot log, and string properties.
//!
//! All of these are read-only values. A commit replaces the whole metadata document; the planner
//! only ever holds borrowed views of one version of it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::expressions::Scalar;
use crate::io::FileIO;
use crate::partition::PartitionSpec;
use crate::schema::SchemaRef;
use crate::{Error, FloeResult, SnapshotId};

/// Target split weight and bin-packing target, in bytes.
pub const SPLIT_SIZE: &str = "read.split.target-size";
pub const SPLIT_SIZE_DEFAULT: i64 = 128 * 1024 * 1024; // 128 MiB

/// Maximum number of bins held open while packing splits.
pub const SPLIT_LOOKBACK: &str = "read.split.planning-lookback";
pub const SPLIT_LOOKBACK_DEFAULT: i32 = 10;

/// Floor weight for small files, so tiny inputs still cost one open.
pub const SPLIT_OPEN_FILE_COST: &str = "read.split.open-file-cost";
pub const SPLIT_OPEN_FILE_COST_DEFAULT: i64 = 4 * 1024 * 1024; // 4 MiB

/// Whether manifest expansion may fan out on the shared worker pool.
pub const SCAN_WORKER_POOL_ENABLED: &str = "floe.scan-planning.worker-pool-enabled";
pub const SCAN_WORKER_POOL_ENABLED_DEFAULT: bool = true;

/// Per-partition-column summary carried by a manifest: the range of values (and null presence)
/// across every data file the manifest lists. Authoritative for pruning decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFieldSummary {
    pub contains_null: bool,
    /// Smallest non-null partition value, absent when every value is null.
    pub lower_bound: Option<Scalar>,
    /// Largest non-null partition value, absent when every value is null.
    pub upper_bound: Option<Scalar>,
}

/// A reference to one manifest file belonging to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub length: u64,
    /// Id of the partition spec under which this manifest's entries were written.
    pub partition_spec_id: i32,
    /// One summary per partition field, in spec order.
    pub partition_summaries: Vec<PartitionFieldSummary>,
}

/// An immutable, point-in-time view of a table's data. Snapshots are never mutated; a new
/// snapshot supersedes the previous one by metadata replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    snapshot_id: SnapshotId,
    timestamp_ms: i64,
    manifests: Vec<ManifestFile>,
}

impl Snapshot {
    pub fn new(
        snapshot_id: SnapshotId,
        timestamp_ms: i64,
        manifests: impl IntoIterator<Item = ManifestFile>,
    ) -> Self {
        Self {
            snapshot_id,
            timestamp_ms,
            manifests: manifests.into_iter().collect(),
        }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn manifests(&self) -> &[ManifestFile] {
        &self.manifests
    }
}

/// One entry of the snapshot log: this snapshot became current at this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLogEntry {
    pub timestamp_ms: i64,
    pub snapshot_id: SnapshotId,
}

/// The immutable metadata document describing one version of a table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    schema: SchemaRef,
    specs: Vec<PartitionSpec>,
    current_snapshot_id: Option<SnapshotId>,
    snapshots: Vec<Snapshot>,
    /// Time-ordered (ascending) history of current-snapshot changes. Ascending order is a
    /// precondition; time travel walks this log forward.
    snapshot_log: Vec<SnapshotLogEntry>,
    properties: HashMap<String, String>,
}

impl TableMetadata {
    pub fn builder(schema: SchemaRef) -> TableMetadataBuilder {
        TableMetadataBuilder::new(schema)
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn spec(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.specs.iter().find(|s| s.spec_id == spec_id)
    }

    pub fn snapshot(&self, snapshot_id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id.and_then(|id| self.snapshot(id))
    }

    pub fn snapshot_log(&self) -> &[SnapshotLogEntry] {
        &self.snapshot_log
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn property_as_long(&self, key: &str, default: i64) -> i64 {
        self.parsed_property(key).unwrap_or(default)
    }

    pub fn property_as_int(&self, key: &str, default: i32) -> i32 {
        self.parsed_property(key).unwrap_or(default)
    }

    pub fn property_as_bool(&self, key: &str, default: bool) -> bool {
        self.parsed_property(key).unwrap_or(default)
    }

    fn parsed_property<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let value = self.properties.get(key)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Ignoring unparseable value '{value}' for table property '{key}'");
                None
            }
        }
    }
}

/// Builder for [`TableMetadata`]. Mostly used by catalogs and tests; the planner itself never
/// constructs metadata.
pub struct TableMetadataBuilder {
    schema: SchemaRef,
    specs: Vec<PartitionSpec>,
    current_snapshot_id: Option<SnapshotId>,
    snapshots: Vec<Snapshot>,
    snapshot_log: Vec<SnapshotLogEntry>,
    properties: HashMap<String, String>,
}

impl TableMetadataBuilder {
    fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            specs: vec![],
            current_snapshot_id: None,
            snapshots: vec![],
            snapshot_log: vec![],
            properties: HashMap::new(),
        }
    }

    pub fn with_spec(mut self, spec: PartitionSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Appends a snapshot and logs it as current at its own timestamp.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.current_snapshot_id = Some(snapshot.snapshot_id());
        self.snapshot_log.push(SnapshotLogEntry {
            timestamp_ms: snapshot.timestamp_ms(),
            snapshot_id: snapshot.snapshot_id(),
        });
        self.snapshots.push(snapshot);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn build(self) -> FloeResult<TableMetadata> {
        let sorted = self
            .snapshot_log
            .windows(2)
            .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms);
        if !sorted {
            return Err(Error::invalid_argument(
                "Snapshot log must be ordered by ascending timestamp",
            ));
        }
        Ok(TableMetadata {
            schema: self.schema,
            specs: self.specs,
            current_snapshot_id: self.current_snapshot_id,
            snapshots: self.snapshots,
            snapshot_log: self.snapshot_log,
            properties: self.properties,
        })
    }
}

/// The catalog-facing seam the planner reads table state through.
pub trait TableOperations: Send + Sync {
    /// The table's current metadata document.
    fn current(&self) -> Arc<TableMetadata>;

    /// File IO for reading this table's manifests.
    fn io(&self) -> Arc<dyn FileIO>;
}

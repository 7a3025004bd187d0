//! Scan task types: the units of work handed to an execution engine.

use serde::{Deserialize, Serialize};

use crate::expressions::BoundPredicate;
use crate::manifest::DataFile;
use crate::partition::PartitionSpec;
use crate::schema::Schema;
use crate::FloeResult;

/// A byte range of one data file, bound to the serialized schema and partition spec its manifest
/// was written under and to the residual predicate a reader must still apply per row.
///
/// Tasks are self-contained: the JSON payloads mean a task can cross a process boundary and be
/// executed with no access to planner state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileScanTask {
    file: DataFile,
    start: u64,
    length: u64,
    schema_json: String,
    spec_json: String,
    residual: BoundPredicate,
}

impl FileScanTask {
    /// A task covering the whole file.
    pub(crate) fn new(
        file: DataFile,
        schema_json: String,
        spec_json: String,
        residual: BoundPredicate,
    ) -> Self {
        let length = file.file_size_in_bytes;
        Self {
            file,
            start: 0,
            length,
            schema_json,
            spec_json,
            residual,
        }
    }

    pub fn file(&self) -> &DataFile {
        &self.file
    }

    /// Byte offset this task starts at.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Byte length of this task's range.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The part of the scan's row filter not already guaranteed by this file's partition values.
    /// `AlwaysTrue` means every row matches; `AlwaysFalse` means the reader can skip the file.
    pub fn residual(&self) -> &BoundPredicate {
        &self.residual
    }

    pub fn schema_json(&self) -> &str {
        &self.schema_json
    }

    pub fn spec_json(&self) -> &str {
        &self.spec_json
    }

    pub fn schema(&self) -> FloeResult<Schema> {
        Schema::from_json(&self.schema_json)
    }

    pub fn spec(&self) -> FloeResult<PartitionSpec> {
        PartitionSpec::from_json(&self.spec_json)
    }

    /// Splits this task into ranges of at most `split_size` bytes whose union covers it. A task
    /// no longer than `split_size` is returned unchanged.
    pub fn split(self, split_size: u64) -> Vec<FileScanTask> {
        debug_assert!(split_size > 0, "split size must be positive");
        if self.length <= split_size || split_size == 0 {
            return vec![self];
        }
        let mut splits = Vec::with_capacity(self.length.div_ceil(split_size) as usize);
        let mut offset = 0;
        while offset < self.length {
            let length = split_size.min(self.length - offset);
            splits.push(FileScanTask {
                file: self.file.clone(),
                start: self.start + offset,
                length,
                schema_json: self.schema_json.clone(),
                spec_json: self.spec_json.clone(),
                residual: self.residual.clone(),
            });
            offset += length;
        }
        splits
    }
}

/// An ordered group of splits packed to approximate the target split weight; one unit of
/// downstream work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScanTask {
    tasks: Vec<FileScanTask>,
}

impl CombinedScanTask {
    pub(crate) fn new(tasks: Vec<FileScanTask>) -> Self {
        debug_assert!(!tasks.is_empty(), "combined tasks are never empty");
        Self { tasks }
    }

    /// The splits in this group, in packing order.
    pub fn files(&self) -> &[FileScanTask] {
        &self.tasks
    }
}

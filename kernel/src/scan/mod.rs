//! Functionality to plan scans (reads) over a snapshot of a table.
//!
//! A [`TableScan`] is an immutable description of one read: at most one pinned snapshot, a row
//! filter, a projection, and a case-sensitivity flag. Refinements return new scans; the original
//! is never mutated, so scans can be shared freely across threads and re-planned with swept
//! parameters. Planning itself is lazy: [`TableScan::plan_files`] prunes the snapshot's manifest
//! list up front but opens manifests only as the returned sequence is pulled (on the shared
//! worker pool when enabled), and [`TableScan::plan_tasks`] layers split generation and
//! bin-packing on top without materializing anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use tracing::{debug, info};

use crate::events::{Listeners, ScanEvent};
use crate::expressions::Predicate;
use crate::io::FileIO;
use crate::iter::pack::PackingIterator;
use crate::iter::parallel::{get_worker_pool, ParallelIterator};
use crate::iter::{CloseList, CloseableIterator};
use crate::manifest::{ManifestReader, STATS_COLUMNS};
use crate::metadata::{
    ManifestFile, TableOperations, SCAN_WORKER_POOL_ENABLED, SCAN_WORKER_POOL_ENABLED_DEFAULT,
    SPLIT_LOOKBACK, SPLIT_LOOKBACK_DEFAULT, SPLIT_OPEN_FILE_COST, SPLIT_OPEN_FILE_COST_DEFAULT,
    SPLIT_SIZE, SPLIT_SIZE_DEFAULT,
};
use crate::predicates::residual::ResidualEvaluator;
use crate::predicates::InclusiveManifestEvaluator;
use crate::schema::SchemaRef;
use crate::utils::require;
use crate::{Error, FloeResult, SnapshotId};

mod task;
pub use task::{CombinedScanTask, FileScanTask};

/// Per-scan memo of manifest evaluators, keyed by partition spec id.
///
/// Values are pure functions of `(spec, filter, case_sensitive)`, all fixed for one scan, so
/// duplicate construction under concurrency would be wasteful but harmless; last insert wins.
struct EvaluatorCache {
    evaluators: Mutex<HashMap<i32, Arc<InclusiveManifestEvaluator>>>,
}

impl EvaluatorCache {
    fn new() -> Self {
        Self {
            evaluators: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(
        &self,
        spec_id: i32,
        build: impl FnOnce() -> FloeResult<InclusiveManifestEvaluator>,
    ) -> FloeResult<Arc<InclusiveManifestEvaluator>> {
        {
            let evaluators = self
                .evaluators
                .lock()
                .map_err(|_| Error::internal("evaluator cache lock poisoned"))?;
            if let Some(evaluator) = evaluators.get(&spec_id) {
                return Ok(evaluator.clone());
            }
        }
        let evaluator = Arc::new(build()?);
        let mut evaluators = self
            .evaluators
            .lock()
            .map_err(|_| Error::internal("evaluator cache lock poisoned"))?;
        Ok(evaluators.entry(spec_id).or_insert(evaluator).clone())
    }
}

/// An immutable scan over one table.
///
/// Build one with [`TableScan::new`], refine it with [`use_snapshot`], [`as_of_time`],
/// [`project`], [`case_sensitive`], [`select`], and [`filter`] (each returns a new scan), then
/// call [`plan_files`] or [`plan_tasks`].
///
/// [`use_snapshot`]: TableScan::use_snapshot
/// [`as_of_time`]: TableScan::as_of_time
/// [`project`]: TableScan::project
/// [`case_sensitive`]: TableScan::case_sensitive
/// [`select`]: TableScan::select
/// [`filter`]: TableScan::filter
/// [`plan_files`]: TableScan::plan_files
/// [`plan_tasks`]: TableScan::plan_tasks
pub struct TableScan {
    ops: Arc<dyn TableOperations>,
    table_name: String,
    snapshot_id: Option<SnapshotId>,
    projected_schema: Option<SchemaRef>,
    row_filter: Predicate,
    case_sensitive: bool,
    selected_columns: Option<Vec<String>>,
    eval_cache: Arc<EvaluatorCache>,
}

impl std::fmt::Debug for TableScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableScan")
            .field("table", &self.table_name)
            .field("snapshot_id", &self.snapshot_id)
            .field("filter", &self.row_filter)
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

impl TableScan {
    /// A scan of the table's current snapshot, selecting all columns with no filter.
    pub fn new(ops: Arc<dyn TableOperations>, table_name: impl Into<String>) -> Self {
        Self {
            ops,
            table_name: table_name.into(),
            snapshot_id: None,
            projected_schema: None,
            row_filter: Predicate::AlwaysTrue,
            case_sensitive: true,
            selected_columns: None,
            eval_cache: Arc::new(EvaluatorCache::new()),
        }
    }

    // Refinements share everything except a fresh evaluator cache: cached evaluators depend on
    // the filter and case sensitivity, so a refined scan must start over.
    fn refine(&self) -> TableScan {
        TableScan {
            ops: self.ops.clone(),
            table_name: self.table_name.clone(),
            snapshot_id: self.snapshot_id,
            projected_schema: self.projected_schema.clone(),
            row_filter: self.row_filter.clone(),
            case_sensitive: self.case_sensitive,
            selected_columns: self.selected_columns.clone(),
            eval_cache: Arc::new(EvaluatorCache::new()),
        }
    }

    /// Pins this scan to the snapshot with the given id. Fails if the id is unknown or a
    /// snapshot is already pinned.
    pub fn use_snapshot(&self, snapshot_id: SnapshotId) -> FloeResult<TableScan> {
        require!(
            self.snapshot_id.is_none(),
            Error::invalid_argument(format!(
                "Cannot override snapshot, already set to id={}",
                self.snapshot_id.unwrap_or_default()
            ))
        );
        require!(
            self.ops.current().snapshot(snapshot_id).is_some(),
            Error::invalid_argument(format!("Cannot find snapshot with id {snapshot_id}"))
        );
        let mut scan = self.refine();
        scan.snapshot_id = Some(snapshot_id);
        Ok(scan)
    }

    /// Pins this scan to the latest snapshot that was current at `timestamp_ms`: the last
    /// snapshot-log entry with a timestamp at or before it. Fails if no entry qualifies or a
    /// snapshot is already pinned.
    pub fn as_of_time(&self, timestamp_ms: i64) -> FloeResult<TableScan> {
        require!(
            self.snapshot_id.is_none(),
            Error::invalid_argument(format!(
                "Cannot override snapshot, already set to id={}",
                self.snapshot_id.unwrap_or_default()
            ))
        );
        // the log is ordered by ascending timestamp, so the last qualifying entry wins ties
        let mut last_snapshot_id = None;
        for entry in self.ops.current().snapshot_log() {
            if entry.timestamp_ms <= timestamp_ms {
                last_snapshot_id = Some(entry.snapshot_id);
            }
        }
        let snapshot_id = last_snapshot_id.ok_or_else(|| {
            Error::invalid_argument(format!("Cannot find a snapshot older than {timestamp_ms}"))
        })?;
        self.use_snapshot(snapshot_id)
    }

    /// Replaces the projected schema. Overridden by [`TableScan::select`].
    pub fn project(&self, schema: SchemaRef) -> TableScan {
        let mut scan = self.refine();
        scan.projected_schema = Some(schema);
        scan
    }

    pub fn case_sensitive(&self, case_sensitive: bool) -> TableScan {
        let mut scan = self.refine();
        scan.case_sensitive = case_sensitive;
        scan
    }

    /// Selects columns by name. Resolution to field ids happens lazily so that `select` and
    /// `case_sensitive` compose in either order.
    pub fn select(&self, columns: impl IntoIterator<Item = impl Into<String>>) -> TableScan {
        let mut scan = self.refine();
        scan.selected_columns = Some(columns.into_iter().map(Into::into).collect());
        scan
    }

    /// Adds a row filter, combined with any existing filter by conjunction.
    pub fn filter(&self, expr: Predicate) -> TableScan {
        let mut scan = self.refine();
        scan.row_filter = Predicate::and(self.row_filter.clone(), expr);
        scan
    }

    pub fn table(&self) -> &str {
        &self.table_name
    }

    pub fn row_filter(&self) -> &Predicate {
        &self.row_filter
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        self.snapshot_id
    }

    /// The schema this scan projects.
    ///
    /// With an explicit column selection, this is the union of the selected columns and every
    /// column the row filter references, resolved under the scan's case sensitivity and in table
    /// schema order. Resolution happens here rather than in [`TableScan::select`] so that `select`
    /// and `case_sensitive` may be applied in either order.
    pub fn schema(&self) -> FloeResult<SchemaRef> {
        let metadata = self.ops.current();
        let table_schema = metadata.schema();
        let Some(selected) = &self.selected_columns else {
            return Ok(self
                .projected_schema
                .clone()
                .unwrap_or_else(|| table_schema.clone()));
        };

        // all of the filter columns are required
        let mut required_ids = self
            .row_filter
            .bind(table_schema, self.case_sensitive)?
            .references();
        // all of the selected columns are required
        required_ids.extend(table_schema.project_ids(selected, self.case_sensitive)?);

        Ok(Arc::new(table_schema.select(&required_ids)))
    }

    /// Plans the files this scan will read: resolves the snapshot, prunes its manifest list with
    /// per-spec manifest evaluators, and expands each surviving manifest into [`FileScanTask`]s,
    /// in parallel on the shared worker pool when the table enables it.
    ///
    /// Manifests are read lazily as the sequence is pulled. Every reader opened along the way is
    /// registered with the returned iterator and released when it is closed or dropped.
    pub fn plan_files(&self) -> FloeResult<CloseableIterator<FileScanTask>> {
        let metadata = self.ops.current();
        let snapshot = match self.snapshot_id {
            Some(id) => metadata.snapshot(id).ok_or_else(|| {
                Error::invalid_argument(format!("Cannot find snapshot with id {id}"))
            })?,
            None => match metadata.current_snapshot() {
                Some(snapshot) => snapshot,
                None => {
                    info!("Scanning empty table {}", self.table_name);
                    return Ok(CloseableIterator::empty());
                }
            },
        };

        info!(
            "Scanning table {} snapshot {} created at {} with filter {}",
            self.table_name,
            snapshot.snapshot_id(),
            snapshot.timestamp_ms(),
            self.row_filter
        );
        Listeners::notify_all(&ScanEvent::new(
            &self.table_name,
            snapshot.snapshot_id(),
            self.row_filter.clone(),
            self.schema()?,
        ));

        let mut matching: Vec<ManifestFile> = Vec::new();
        for manifest in snapshot.manifests() {
            let evaluator = self.eval_cache.get_or_create(manifest.partition_spec_id, || {
                let spec = metadata.spec(manifest.partition_spec_id).ok_or_else(|| {
                    Error::internal(format!(
                        "Manifest {} references unknown partition spec {}",
                        manifest.path, manifest.partition_spec_id
                    ))
                })?;
                InclusiveManifestEvaluator::new(
                    spec.clone(),
                    metadata.schema(),
                    &self.row_filter,
                    self.case_sensitive,
                )
            })?;
            if evaluator.eval(manifest)? {
                matching.push(manifest.clone());
            }
        }
        debug!(
            "Planning {} of {} manifest(s) for snapshot {}",
            matching.len(),
            snapshot.manifests().len(),
            snapshot.snapshot_id()
        );

        let close_list = CloseList::new();
        let io = self.ops.io();
        let use_pool = metadata
            .property_as_bool(SCAN_WORKER_POOL_ENABLED, SCAN_WORKER_POOL_ENABLED_DEFAULT)
            && matching.len() > 1;

        let readers: Vec<_> = matching
            .into_iter()
            .map(|manifest| {
                let io = io.clone();
                let close_list = close_list.clone();
                let filter = self.row_filter.clone();
                let case_sensitive = self.case_sensitive;
                move || manifest_tasks(io, manifest, filter, case_sensitive, close_list)
            })
            .collect();

        let tasks: Box<dyn Iterator<Item = FloeResult<FileScanTask>> + Send> = if use_pool {
            let parallel = ParallelIterator::new(readers, get_worker_pool());
            // registered ahead of the readers: closing the stream stops scheduling first
            close_list.add(Box::new(parallel.cancel_handle()))?;
            Box::new(parallel)
        } else {
            Box::new(readers.into_iter().flat_map(|open| open()))
        };
        Ok(CloseableIterator::new(tasks, close_list))
    }

    /// Plans combined tasks: expands [`TableScan::plan_files`] output into splits of at most
    /// `read.split.target-size` bytes, then bin-packs the splits (weighted by byte length floored
    /// at `read.split.open-file-cost`) under the configured lookback.
    ///
    /// The returned iterator owns the file-scan sequence and closes it on close.
    pub fn plan_tasks(&self) -> FloeResult<CloseableIterator<CombinedScanTask>> {
        let metadata = self.ops.current();
        let split_size = metadata.property_as_long(SPLIT_SIZE, SPLIT_SIZE_DEFAULT);
        let lookback = metadata.property_as_int(SPLIT_LOOKBACK, SPLIT_LOOKBACK_DEFAULT);
        let open_file_cost =
            metadata.property_as_long(SPLIT_OPEN_FILE_COST, SPLIT_OPEN_FILE_COST_DEFAULT);
        require!(
            split_size > 0,
            Error::invalid_argument(format!("{SPLIT_SIZE} must be positive, got {split_size}"))
        );
        require!(
            lookback > 0,
            Error::invalid_argument(format!("{SPLIT_LOOKBACK} must be positive, got {lookback}"))
        );
        require!(
            open_file_cost >= 0,
            Error::invalid_argument(format!(
                "{SPLIT_OPEN_FILE_COST} must not be negative, got {open_file_cost}"
            ))
        );
        let split_size = split_size as u64;
        let open_file_cost = open_file_cost as u64;

        let files = self.plan_files()?;
        let close_list = files.close_list().clone();

        let splits = files
            .map(move |task| task.map(|task| task.split(split_size)))
            .flatten_ok();
        let packed = PackingIterator::new(splits, split_size, lookback as usize, move |task| {
            task.length().max(open_file_cost)
        });
        let combined = packed.map(|bin| bin.map(CombinedScanTask::new));
        Ok(CloseableIterator::new(combined, close_list))
    }
}

/// Opens one manifest and maps its surviving entries to [`FileScanTask`]s. Called on a planning
/// worker under parallel planning; an open failure becomes the single item of the returned
/// sequence so that workers never swallow errors.
fn manifest_tasks(
    io: Arc<dyn FileIO>,
    manifest: ManifestFile,
    filter: Predicate,
    case_sensitive: bool,
    close_list: CloseList,
) -> Box<dyn Iterator<Item = FloeResult<FileScanTask>> + Send> {
    match open_manifest(io, &manifest, filter, case_sensitive, close_list) {
        Ok(tasks) => Box::new(tasks),
        Err(e) => Box::new(std::iter::once(Err(e))),
    }
}

fn open_manifest(
    io: Arc<dyn FileIO>,
    manifest: &ManifestFile,
    filter: Predicate,
    case_sensitive: bool,
    close_list: CloseList,
) -> FloeResult<impl Iterator<Item = FloeResult<FileScanTask>> + Send> {
    let input = io.new_input_file(&manifest.path)?;
    let reader = ManifestReader::read(input)?
        .case_sensitive(case_sensitive)
        .filter_rows(&filter)?
        .select(STATS_COLUMNS);
    close_list.add(Box::new(reader.closer()))?;

    let schema_json = reader.schema().to_json()?;
    let spec_json = reader.spec().to_json()?;
    let residuals =
        ResidualEvaluator::new(reader.spec().clone(), reader.schema(), &filter, case_sensitive)?;

    Ok(reader.map(move |entry| {
        let file = entry?;
        let residual = residuals.residual_for(&file.partition);
        Ok(FileScanTask::new(
            file,
            schema_json.clone(),
            spec_json.clone(),
            residual,
        ))
    }))
}

#[cfg(test)]
mod tests;

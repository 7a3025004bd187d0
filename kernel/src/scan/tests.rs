use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::executor::block_on;
use object_store::memory::InMemory;
use object_store::ObjectStore;

use super::*;
use crate::expressions::{BoundPredicate, Scalar};
use crate::io::{InputFile, ObjectStoreFileIO};
use crate::manifest::{DataFile, FileFormat, ManifestWriter};
use crate::metadata::{Snapshot, TableMetadata};
use crate::partition::{PartitionField, PartitionSpec};
use crate::schema::{PrimitiveType, Schema, StructField};

const MIB: u64 = 1024 * 1024;

fn table_schema() -> SchemaRef {
    Arc::new(Schema::new([
        StructField::required(1, "id", PrimitiveType::Long),
        StructField::optional(2, "date", PrimitiveType::String),
        StructField::optional(3, "Name", PrimitiveType::String),
    ]))
}

fn date_spec() -> PartitionSpec {
    PartitionSpec::new(0, [PartitionField::identity(2, "date")])
}

fn data_file(path: &str, date: &str, id_bounds: (i64, i64), size: u64) -> DataFile {
    DataFile {
        path: path.to_string(),
        file_format: FileFormat::Parquet,
        file_size_in_bytes: size,
        record_count: 100,
        partition: vec![Some(Scalar::from(date))],
        value_counts: HashMap::from([(1, 100), (2, 100)]),
        null_value_counts: HashMap::from([(1, 0), (2, 0)]),
        lower_bounds: HashMap::from([
            (1, Scalar::Long(id_bounds.0)),
            (2, Scalar::from(date)),
        ]),
        upper_bounds: HashMap::from([
            (1, Scalar::Long(id_bounds.1)),
            (2, Scalar::from(date)),
        ]),
    }
}

/// Like [`data_file`], but without statistics for the partition column, the way a writer that
/// only collects stats for data columns would produce entries.
fn data_file_no_date_stats(path: &str, date: &str, size: u64) -> DataFile {
    let mut file = data_file(path, date, (1, 10), size);
    file.value_counts.remove(&2);
    file.null_value_counts.remove(&2);
    file.lower_bounds.remove(&2);
    file.upper_bounds.remove(&2);
    file
}

/// Writes one manifest into the store and returns its catalog record.
fn write_manifest(
    store: &Arc<InMemory>,
    path: &str,
    files: Vec<DataFile>,
) -> crate::metadata::ManifestFile {
    let mut writer = ManifestWriter::new(table_schema(), date_spec());
    for file in files {
        writer.add(file).unwrap();
    }
    let (manifest, content) = writer.finish(path).unwrap();
    block_on(store.put(
        &object_store::path::Path::from(path),
        bytes::Bytes::from(content).into(),
    ))
    .unwrap();
    manifest
}

struct TestTable {
    metadata: Arc<TableMetadata>,
    io: Arc<dyn crate::io::FileIO>,
}

impl TableOperations for TestTable {
    fn current(&self) -> Arc<TableMetadata> {
        self.metadata.clone()
    }

    fn io(&self) -> Arc<dyn crate::io::FileIO> {
        self.io.clone()
    }
}

/// Counts opened inputs so tests can observe manifest-level pruning.
struct CountingFileIO {
    inner: Arc<dyn crate::io::FileIO>,
    opens: Arc<AtomicUsize>,
}

impl crate::io::FileIO for CountingFileIO {
    fn new_input_file(&self, path: &str) -> FloeResult<Box<dyn InputFile>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.new_input_file(path)
    }
}

struct TableFixture {
    store: Arc<InMemory>,
    builder: Option<crate::metadata::TableMetadataBuilder>,
    opens: Arc<AtomicUsize>,
}

impl TableFixture {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            builder: Some(TableMetadata::builder(table_schema()).with_spec(date_spec())),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.builder = self.builder.take().map(|b| b.with_snapshot(snapshot));
        self
    }

    fn with_property(mut self, key: &str, value: impl ToString) -> Self {
        self.builder = self.builder.take().map(|b| b.with_property(key, value));
        self
    }

    fn scan(mut self) -> (TableScan, Arc<AtomicUsize>) {
        let metadata = self.builder.take().map(|b| b.build().unwrap()).unwrap();
        let io = Arc::new(CountingFileIO {
            inner: Arc::new(ObjectStoreFileIO::new(self.store.clone())),
            opens: self.opens.clone(),
        });
        let ops = Arc::new(TestTable {
            metadata: Arc::new(metadata),
            io,
        });
        (TableScan::new(ops, "db.tbl"), self.opens)
    }
}

fn task_keys(tasks: impl IntoIterator<Item = FloeResult<FileScanTask>>) -> HashSet<(String, u64)> {
    tasks
        .into_iter()
        .map(|t| {
            let t = t.unwrap();
            (t.file().path.clone(), t.start())
        })
        .collect()
}

#[test]
fn test_empty_table_plans_nothing() {
    let (scan, opens) = TableFixture::new().scan();
    assert_eq!(scan.plan_files().unwrap().count(), 0);
    assert_eq!(scan.plan_tasks().unwrap().count(), 0);
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}

#[test]
fn test_single_manifest_splits_and_packs() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m1.json",
        vec![data_file("big.parquet", "2024-01-01", (1, 100), 200 * MIB)],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let tasks: Vec<_> = scan.plan_tasks().unwrap().map(|t| t.unwrap()).collect();
    assert_eq!(tasks.len(), 2);
    let weights: Vec<u64> = tasks
        .iter()
        .map(|t| t.files().iter().map(FileScanTask::length).sum())
        .collect();
    assert_eq!(weights.iter().sum::<u64>(), 200 * MIB);
    assert!(weights[0] >= 100 * MIB);
}

#[test]
fn test_partition_summary_prunes_manifests() {
    let fixture = TableFixture::new();
    let december = write_manifest(
        &fixture.store,
        "dec.json",
        vec![
            data_file("dec-1.parquet", "2023-12-01", (1, 10), MIB),
            data_file("dec-2.parquet", "2023-12-31", (11, 20), MIB),
        ],
    );
    let january = write_manifest(
        &fixture.store,
        "jan.json",
        vec![
            data_file("jan-1.parquet", "2024-01-01", (1, 10), MIB),
            data_file("jan-2.parquet", "2024-01-31", (11, 20), MIB),
        ],
    );
    let (scan, opens) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [december, january]))
        .scan();

    let scan = scan.filter(Predicate::equal("date", "2024-01-01"));
    let paths: HashSet<_> = scan
        .plan_files()
        .unwrap()
        .map(|t| t.unwrap().file().path.clone())
        .collect();
    // only the january manifest was opened, and only its matching file survives entry pruning
    assert_eq!(paths, HashSet::from(["jan-1.parquet".to_string()]));
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}

#[test]
fn test_residual_and_task_payloads() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m1.json",
        vec![data_file("a.parquet", "2024-01-01", (1, 1000), MIB)],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let scan = scan.filter(Predicate::and(
        Predicate::equal("date", "2024-01-01"),
        Predicate::greater_than("id", 100i64),
    ));
    let task = scan.plan_files().unwrap().next().unwrap().unwrap();

    // the date leg is resolved by partitioning; only the id comparison remains
    let expected = Predicate::greater_than("id", 100i64)
        .bind(&table_schema(), true)
        .unwrap();
    assert_eq!(task.residual(), &expected);

    // serialized payloads round-trip to the manifest's schema and spec
    assert_eq!(task.schema().unwrap(), *table_schema());
    assert_eq!(task.spec().unwrap(), date_spec());
}

#[test]
fn test_residual_collapses_to_false_for_other_partition() {
    let fixture = TableFixture::new();
    // without date stats the entries survive stats pruning; the non-matching file comes back
    // with a false residual that tells the reader to skip it
    let manifest = write_manifest(
        &fixture.store,
        "m1.json",
        vec![
            data_file_no_date_stats("a.parquet", "2024-01-01", MIB),
            data_file_no_date_stats("b.parquet", "2024-01-02", MIB),
        ],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();
    let scan = scan.filter(Predicate::equal("date", "2024-01-01"));

    let residuals: HashMap<String, BoundPredicate> = scan
        .plan_files()
        .unwrap()
        .map(|t| {
            let t = t.unwrap();
            (t.file().path.clone(), t.residual().clone())
        })
        .collect();
    assert_eq!(residuals["a.parquet"], BoundPredicate::AlwaysTrue);
    assert_eq!(residuals["b.parquet"], BoundPredicate::AlwaysFalse);
}

#[test]
fn test_as_of_time_selects_latest_qualifying_snapshot() {
    let fixture = TableFixture::new();
    let m_a = write_manifest(&fixture.store, "a.json", vec![]);
    let m_b = write_manifest(
        &fixture.store,
        "b.json",
        vec![data_file("b.parquet", "2024-01-01", (1, 10), MIB)],
    );
    let m_c = write_manifest(&fixture.store, "c.json", vec![]);
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(10, 1000, [m_a]))
        .with_snapshot(Snapshot::new(20, 2000, [m_b]))
        .with_snapshot(Snapshot::new(30, 3000, [m_c]))
        .scan();

    assert_eq!(scan.as_of_time(2500).unwrap().snapshot_id(), Some(20));
    // an exact timestamp selects that snapshot
    assert_eq!(scan.as_of_time(3000).unwrap().snapshot_id(), Some(30));
    assert!(matches!(
        scan.as_of_time(999),
        Err(Error::InvalidArgument(_))
    ));

    // the pinned snapshot, not the current one, is planned
    let paths = task_keys(scan.as_of_time(2500).unwrap().plan_files().unwrap());
    assert_eq!(paths, HashSet::from([("b.parquet".to_string(), 0)]));
}

#[test]
fn test_snapshot_pinning_rules() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(&fixture.store, "m.json", vec![]);
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    assert!(matches!(
        scan.use_snapshot(42),
        Err(Error::InvalidArgument(_))
    ));

    let pinned = scan.use_snapshot(1).unwrap();
    assert!(matches!(
        pinned.use_snapshot(1),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        pinned.as_of_time(5000),
        Err(Error::InvalidArgument(_))
    ));

    // refinements preserve the pin; the original scan is unchanged
    let refined = pinned.case_sensitive(false).filter(Predicate::AlwaysTrue);
    assert_eq!(refined.snapshot_id(), Some(1));
    assert_eq!(scan.snapshot_id(), None);
}

#[test]
fn test_case_insensitive_projection() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m.json",
        vec![data_file("a.parquet", "2024-01-01", (1, 10), MIB)],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let insensitive = scan.select(["name"]).case_sensitive(false);
    let projected = insensitive.schema().unwrap();
    assert!(projected.field_by_id(3).is_some());
    assert_eq!(projected.len(), 1);
    // the refinements compose in the other order too
    let reordered = scan.case_sensitive(false).select(["name"]);
    assert_eq!(*reordered.schema().unwrap(), *projected);

    let sensitive = scan.select(["name"]).case_sensitive(true);
    assert!(matches!(sensitive.schema(), Err(Error::Validation(_))));
    assert!(matches!(sensitive.plan_files(), Err(Error::Validation(_))));
}

#[test]
fn test_projection_includes_filter_references() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(&fixture.store, "m.json", vec![]);
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let scan = scan
        .select(["Name"])
        .filter(Predicate::greater_than("id", 5i64));
    let projected = scan.schema().unwrap();
    let ids: Vec<_> = projected.fields().map(|f| f.id).collect();
    // filter refs and selected ids, in table schema order
    assert_eq!(ids, [1, 3]);
}

#[test]
fn test_filter_conjunction_equivalence() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m.json",
        vec![
            data_file("a.parquet", "2024-01-01", (1, 10), MIB),
            data_file("b.parquet", "2024-01-01", (50, 90), MIB),
            data_file("c.parquet", "2024-01-02", (1, 10), MIB),
        ],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let e1 = Predicate::equal("date", "2024-01-01");
    let e2 = Predicate::less_than("id", 20i64);
    let chained = task_keys(scan.filter(e1.clone()).filter(e2.clone()).plan_files().unwrap());
    let combined = task_keys(scan.filter(Predicate::and(e1, e2)).plan_files().unwrap());
    assert_eq!(chained, combined);
    assert_eq!(chained, HashSet::from([("a.parquet".to_string(), 0)]));
}

#[test]
fn test_sequential_planning_preserves_manifest_order() {
    let fixture = TableFixture::new();
    let manifests: Vec<_> = (0..4)
        .map(|i| {
            write_manifest(
                &fixture.store,
                &format!("m{i}.json"),
                vec![data_file(&format!("f{i}.parquet"), "2024-01-01", (1, 10), MIB)],
            )
        })
        .collect();
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, manifests))
        .with_property(crate::metadata::SCAN_WORKER_POOL_ENABLED, false)
        .scan();

    let paths: Vec<_> = scan
        .plan_files()
        .unwrap()
        .map(|t| t.unwrap().file().path.clone())
        .collect();
    assert_eq!(paths, ["f0.parquet", "f1.parquet", "f2.parquet", "f3.parquet"]);
}

#[test]
fn test_parallel_planning_yields_every_task() {
    let fixture = TableFixture::new();
    let manifests: Vec<_> = (0..20)
        .map(|i| {
            write_manifest(
                &fixture.store,
                &format!("m{i}.json"),
                vec![data_file(&format!("f{i}.parquet"), "2024-01-01", (1, 10), MIB)],
            )
        })
        .collect();
    let (scan, opens) = fixture
        .with_snapshot(Snapshot::new(1, 1000, manifests))
        .scan();

    let paths: HashSet<_> = scan
        .plan_files()
        .unwrap()
        .map(|t| t.unwrap().file().path.clone())
        .collect();
    assert_eq!(paths.len(), 20);
    assert_eq!(opens.load(Ordering::SeqCst), 20);
}

#[test]
fn test_closing_mid_plan_stops_and_closes() {
    let fixture = TableFixture::new();
    let manifests: Vec<_> = (0..20)
        .map(|i| {
            write_manifest(
                &fixture.store,
                &format!("m{i}.json"),
                vec![
                    data_file(&format!("f{i}-a.parquet"), "2024-01-01", (1, 10), MIB),
                    data_file(&format!("f{i}-b.parquet"), "2024-01-01", (1, 10), MIB),
                ],
            )
        })
        .collect();
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, manifests))
        .scan();

    let mut files = scan.plan_files().unwrap();
    for _ in 0..3 {
        assert!(files.next().unwrap().is_ok());
    }
    files.close().unwrap();
    assert!(files.next().is_none());
    // close is idempotent even with readers registered from worker threads
    files.close().unwrap();
}

#[test]
fn test_plan_tasks_closes_file_stream() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m.json",
        vec![data_file("a.parquet", "2024-01-01", (1, 10), 10 * MIB)],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let mut tasks = scan.plan_tasks().unwrap();
    assert!(tasks.next().unwrap().is_ok());
    tasks.close().unwrap();
    assert!(tasks.next().is_none());
}

#[test]
fn test_split_properties_are_read_from_table() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(
        &fixture.store,
        "m.json",
        vec![
            data_file("a.parquet", "2024-01-01", (1, 10), 100),
            data_file("b.parquet", "2024-01-01", (1, 10), 100),
            data_file("c.parquet", "2024-01-01", (1, 10), 10),
        ],
    );
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .with_property(crate::metadata::SPLIT_SIZE, 200)
        .with_property(crate::metadata::SPLIT_OPEN_FILE_COST, 100)
        .with_property(crate::metadata::SPLIT_LOOKBACK, 1)
        .scan();

    let tasks: Vec<_> = scan.plan_tasks().unwrap().map(|t| t.unwrap()).collect();
    // a=100, b=100 pack together; c is floored to the open-file cost and starts a new bin
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].files().len(), 2);
    assert_eq!(tasks[1].files().len(), 1);
    assert_eq!(tasks[1].files()[0].file().path, "c.parquet");
}

#[test]
fn test_invalid_split_configuration() {
    let fixture = TableFixture::new();
    let manifest = write_manifest(&fixture.store, "m.json", vec![]);
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .with_property(crate::metadata::SPLIT_SIZE, -1)
        .scan();
    assert!(matches!(scan.plan_tasks(), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_missing_manifest_surfaces_io_error() {
    let fixture = TableFixture::new();
    let mut manifest = write_manifest(
        &fixture.store,
        "m.json",
        vec![data_file("a.parquet", "2024-01-01", (1, 10), MIB)],
    );
    manifest.path = "gone.json".to_string();
    let (scan, _) = fixture
        .with_snapshot(Snapshot::new(1, 1000, [manifest]))
        .scan();

    let results: Vec<_> = scan.plan_files().unwrap().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

//! Manifest files: the per-snapshot listing of data files, with the statistics that drive
//! entry-level pruning.
//!
//! A manifest is encoded as newline-delimited JSON: a header document carrying the schema and
//! partition spec the entries were written under, then one [`DataFile`] document per line. The
//! [`ManifestReader`] exposes a lazy, closeable sequence of entries with row-filter and column
//! selection refinements; the [`ManifestWriter`] appends entries and accumulates the partition
//! summary that manifest-level pruning depends on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::expressions::{Predicate, Scalar};
use crate::io::InputFile;
use crate::iter::Closeable;
use crate::metadata::{ManifestFile, PartitionFieldSummary};
use crate::partition::PartitionSpec;
use crate::predicates::InclusiveMetricsEvaluator;
use crate::schema::{Schema, SchemaRef};
use crate::utils::require;
use crate::{Error, FieldId, FloeResult};

/// Entry columns that make up the minimal stats projection used during planning.
pub const STATS_COLUMNS: &[&str] = &[
    "file_path",
    "file_format",
    "file_size_in_bytes",
    "record_count",
    "partition",
    "value_counts",
    "null_value_counts",
    "lower_bounds",
    "upper_bounds",
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FileFormat {
    Parquet,
    Orc,
    Avro,
}

/// One data file tracked by a manifest, with per-column statistics keyed by field id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub file_format: FileFormat,
    pub file_size_in_bytes: u64,
    pub record_count: u64,
    /// One value per partition spec field, in spec order; `None` is a null partition value.
    pub partition: Vec<Option<Scalar>>,
    #[serde(default)]
    pub value_counts: HashMap<FieldId, u64>,
    #[serde(default)]
    pub null_value_counts: HashMap<FieldId, u64>,
    #[serde(default)]
    pub lower_bounds: HashMap<FieldId, Scalar>,
    #[serde(default)]
    pub upper_bounds: HashMap<FieldId, Scalar>,
}

/// Manifest header: the schema and spec its entries were written under.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestHeader {
    schema: Schema,
    spec: PartitionSpec,
}

// Shared between the reader and its close handle so that a consumer-side close is observed by a
// worker mid-drain.
struct ReaderCore {
    path: String,
    // Some(content) while open; close() takes it, releasing the buffer and the handle together.
    state: Mutex<Option<OpenReader>>,
}

struct OpenReader {
    content: String,
    // byte offset of the next entry line
    cursor: usize,
    #[allow(dead_code)]
    input: Box<dyn InputFile>,
}

impl ReaderCore {
    fn next_line(&self) -> FloeResult<Option<String>> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| Error::internal("manifest reader lock poisoned"))?;
        let Some(open) = guard.as_mut() else {
            // closed from the consumer side
            return Ok(None);
        };
        while open.cursor < open.content.len() {
            let rest = &open.content[open.cursor..];
            let (line, advance) = match rest.find('\n') {
                Some(pos) => (&rest[..pos], pos + 1),
                None => (rest, rest.len()),
            };
            open.cursor += advance;
            if !line.trim().is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }

    fn close(&self) -> FloeResult<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| Error::internal("manifest reader lock poisoned"))?;
        // double-close is a no-op
        *guard = None;
        Ok(())
    }
}

/// Lazy sequence of [`DataFile`] entries from one manifest.
///
/// Refinements follow the open call: [`case_sensitive`] must precede [`filter_rows`], which binds
/// the filter against the manifest's own schema. The reader owns the underlying file handle;
/// closing the handle returned by [`closer`] (or dropping the last reference) releases it, and a
/// reader observed closed yields no further entries.
///
/// [`case_sensitive`]: ManifestReader::case_sensitive
/// [`filter_rows`]: ManifestReader::filter_rows
/// [`closer`]: ManifestReader::closer
pub struct ManifestReader {
    core: Arc<ReaderCore>,
    schema: SchemaRef,
    spec: PartitionSpec,
    case_sensitive: bool,
    filter: Option<InclusiveMetricsEvaluator>,
    projection: Option<Vec<String>>,
}

impl ManifestReader {
    /// Opens a manifest: reads the file and decodes the header. Entry lines are decoded lazily as
    /// the reader is iterated.
    pub fn read(input: Box<dyn InputFile>) -> FloeResult<ManifestReader> {
        let path = input.path().to_string();
        let bytes = input.read()?;
        let content = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::generic(format!("Manifest {path} is not valid UTF-8: {e}")))?;
        let header_end = content.find('\n').unwrap_or(content.len());
        let header_line = &content[..header_end];
        require!(
            !header_line.trim().is_empty(),
            Error::generic(format!("Manifest {path} is empty"))
        );
        let header: ManifestHeader = serde_json::from_str(header_line)?;
        debug!("Opened manifest {path} written under {}", header.spec);
        Ok(ManifestReader {
            core: Arc::new(ReaderCore {
                path,
                state: Mutex::new(Some(OpenReader {
                    cursor: (header_end + 1).min(content.len()),
                    content,
                    input,
                })),
            }),
            schema: Arc::new(header.schema),
            spec: header.spec,
            case_sensitive: true,
            filter: None,
            projection: None,
        })
    }

    /// Schema the manifest's entries were written under.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Partition spec the manifest's entries were written under.
    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> ManifestReader {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Keeps only entries whose statistics say they might contain rows matching `filter`,
    /// using inclusive per-entry bounds and null counts.
    pub fn filter_rows(mut self, filter: &Predicate) -> FloeResult<ManifestReader> {
        self.filter = Some(InclusiveMetricsEvaluator::new(
            &self.schema,
            filter,
            self.case_sensitive,
        )?);
        Ok(self)
    }

    /// Restricts decoded entry columns to `columns`. Identification columns (path, format, size,
    /// record count, partition) are always kept; statistics maps not selected are dropped from
    /// the yielded entries.
    pub fn select(mut self, columns: &[impl AsRef<str>]) -> ManifestReader {
        self.projection = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// A handle that closes this reader's file; registered in the planner's close list.
    pub fn closer(&self) -> ManifestReaderCloser {
        ManifestReaderCloser {
            core: Arc::clone(&self.core),
        }
    }

    fn apply_projection(&self, mut file: DataFile) -> DataFile {
        if let Some(projection) = &self.projection {
            let keep = |name: &str| projection.iter().any(|c| c == name);
            if !keep("value_counts") {
                file.value_counts.clear();
            }
            if !keep("null_value_counts") {
                file.null_value_counts.clear();
            }
            if !keep("lower_bounds") {
                file.lower_bounds.clear();
            }
            if !keep("upper_bounds") {
                file.upper_bounds.clear();
            }
        }
        file
    }
}

impl Iterator for ManifestReader {
    type Item = FloeResult<DataFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.core.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            let file: DataFile = match serde_json::from_str(&line) {
                Ok(file) => file,
                Err(e) => return Some(Err(e.into())),
            };
            if let Some(filter) = &self.filter {
                if !filter.eval(&file) {
                    debug!(
                        "Skipping {}: stats cannot match filter (manifest {})",
                        file.path, self.core.path
                    );
                    continue;
                }
            }
            return Some(Ok(self.apply_projection(file)));
        }
    }
}

/// Consumer-side close handle for a [`ManifestReader`].
pub struct ManifestReaderCloser {
    core: Arc<ReaderCore>,
}

impl Closeable for ManifestReaderCloser {
    fn close(&mut self) -> FloeResult<()> {
        self.core.close()
    }
}

/// Appends [`DataFile`] entries and accumulates the manifest's partition summary.
pub struct ManifestWriter {
    schema: SchemaRef,
    spec: PartitionSpec,
    entries: Vec<DataFile>,
    summaries: Vec<PartitionFieldSummary>,
}

impl ManifestWriter {
    pub fn new(schema: SchemaRef, spec: PartitionSpec) -> Self {
        let summaries = spec
            .fields()
            .iter()
            .map(|_| PartitionFieldSummary {
                contains_null: false,
                lower_bound: None,
                upper_bound: None,
            })
            .collect();
        Self {
            schema,
            spec,
            entries: vec![],
            summaries,
        }
    }

    pub fn add(&mut self, file: DataFile) -> FloeResult<()> {
        require!(
            file.partition.len() == self.spec.fields().len(),
            Error::invalid_argument(format!(
                "Data file {} has {} partition values but spec {} has {} fields",
                file.path,
                file.partition.len(),
                self.spec.spec_id,
                self.spec.fields().len()
            ))
        );
        for (summary, value) in self.summaries.iter_mut().zip(&file.partition) {
            match value {
                None => summary.contains_null = true,
                Some(value) => {
                    let widen_lower = match &summary.lower_bound {
                        Some(lower) => value.partial_cmp(lower) == Some(std::cmp::Ordering::Less),
                        None => true,
                    };
                    if widen_lower {
                        summary.lower_bound = Some(value.clone());
                    }
                    let widen_upper = match &summary.upper_bound {
                        Some(upper) => {
                            value.partial_cmp(upper) == Some(std::cmp::Ordering::Greater)
                        }
                        None => true,
                    };
                    if widen_upper {
                        summary.upper_bound = Some(value.clone());
                    }
                }
            }
        }
        self.entries.push(file);
        Ok(())
    }

    /// Serializes the manifest and returns its catalog record. The caller stores `content` at
    /// `path` through whatever store owns the table.
    pub fn finish(self, path: impl Into<String>) -> FloeResult<(ManifestFile, String)> {
        let header = ManifestHeader {
            schema: (*self.schema).clone(),
            spec: self.spec.clone(),
        };
        let mut content = serde_json::to_string(&header)?;
        content.push('\n');
        for entry in &self.entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        let manifest = ManifestFile {
            path: path.into(),
            length: content.len() as u64,
            partition_spec_id: self.spec.spec_id,
            partition_summaries: self.summaries,
        };
        Ok((manifest, content))
    }
}

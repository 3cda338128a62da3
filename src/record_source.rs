//! The record source and extent oracle contracts.
//!
//! Both are external collaborators: the core partitioner only depends on the traits below.
//! CSV parsing, type inference, and first-pass row-index assignment are explicitly out of
//! scope. The reference implementations here only read already-tiled-ready Arrow IPC files,
//! matching the original tool's fast path when its input is already `.arrow` or `.feather`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Float32Array, RecordBatch};
use arrow_schema::Schema;

use crate::error::TilerResult;
use crate::extent::{Extent, ExtentAccumulator};

/// Yields an ordered sequence of columnar batches sharing one schema.
///
/// Required columns: `x`, `y` (`Float32`), optionally `z`, and `ix` (an unsigned integer row
/// id). All other columns are opaque payload. Implementations are expected to have already
/// dropped rows with a null or non-finite `x`.
pub trait RecordSource {
    /// The schema shared by every batch this source yields.
    fn schema(&self) -> TilerResult<Arc<Schema>>;

    /// Consumes the source, yielding each batch in order.
    fn into_batches(self: Box<Self>) -> TilerResult<Vec<RecordBatch>>;
}

/// Reads a list of pre-built Arrow IPC ("Feather v2") files in file order and batch order.
pub struct FeatherRecordSource {
    paths: Vec<PathBuf>,
}

impl FeatherRecordSource {
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        FeatherRecordSource { paths }
    }
}

impl RecordSource for FeatherRecordSource {
    fn schema(&self) -> TilerResult<Arc<Schema>> {
        let first = self.paths.first().expect("at least one input file");
        let (_, schema) = crate::writer::read_final(first)?;
        Ok(schema)
    }

    fn into_batches(self: Box<Self>) -> TilerResult<Vec<RecordBatch>> {
        let mut out = Vec::new();
        for path in &self.paths {
            let (batches, _) = crate::writer::read_final(path)?;
            out.extend(batches);
        }
        Ok(out)
    }
}

/// Provides the bounding box of the entire input before tiling begins.
pub trait ExtentOracle {
    fn compute(&self, axes: &[&str]) -> TilerResult<Extent>;
}

/// Caller-supplied, explicit bounds (the `--limits` CLI path).
pub struct FixedExtent(pub Extent);

impl ExtentOracle for FixedExtent {
    fn compute(&self, _axes: &[&str]) -> TilerResult<Extent> {
        Ok(self.0.clone())
    }
}

/// Computes min/max per axis over one pass of the batches that will later be tiled.
pub struct ScanningExtentOracle<'a> {
    batches: &'a [RecordBatch],
}

impl<'a> ScanningExtentOracle<'a> {
    #[must_use]
    pub fn new(batches: &'a [RecordBatch]) -> Self {
        ScanningExtentOracle { batches }
    }
}

impl ExtentOracle for ScanningExtentOracle<'_> {
    fn compute(&self, axes: &[&str]) -> TilerResult<Extent> {
        let mut acc = ExtentAccumulator::new();
        for batch in self.batches {
            let schema = batch.schema();
            for &axis in axes {
                let Some(idx) = schema.index_of(axis).ok() else {
                    continue;
                };
                let col = batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .expect("axis column is Float32");
                for v in col.iter().flatten() {
                    acc.observe(axis, v);
                }
            }
        }
        Ok(acc.finish(axes))
    }
}

/// Resolves a record source either from an explicit list of paths, or (reserved for callers
/// that already hold batches in memory) directly.
#[must_use]
pub fn feather_source(files: &[impl AsRef<Path>]) -> FeatherRecordSource {
    FeatherRecordSource::new(files.iter().map(|p| p.as_ref().to_path_buf()).collect())
}

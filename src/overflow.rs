//! The per-tile overflow stream: an append-only spill file used when the descriptor budget
//! forbids creating children for a tile whose buffer is already full.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow_schema::Schema;

use crate::error::TilerResult;

/// An open overflow stream for one tile.
pub struct OverflowWriter {
    path: PathBuf,
    writer: StreamWriter<BufWriter<File>>,
}

impl OverflowWriter {
    /// Opens a fresh overflow stream at `path`.
    ///
    /// Never appends to a stale file left over from an earlier, unrelated overflow epoch at
    /// the same path. If one exists, it is removed first, so two independently-opened epochs
    /// can never get concatenated together.
    pub fn open(path: &Path, schema: &Arc<Schema>) -> TilerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let file = File::create(path)?;
        let writer = StreamWriter::try_new(BufWriter::new(file), schema)?;
        Ok(OverflowWriter {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> TilerResult<()> {
        self.writer.write(batch)?;
        Ok(())
    }

    /// Finishes the stream so every written batch is durable and readable.
    pub fn close(mut self) -> TilerResult<PathBuf> {
        self.writer.finish()?;
        Ok(self.path)
    }
}

/// Reads back every batch written to an overflow stream, in write order, exactly once.
pub fn drain(path: &Path) -> TilerResult<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = StreamReader::try_new(file, None)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

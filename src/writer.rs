//! Tile writer: the two on-disk codecs used for partial and final tile files.
//!
//! The partial codec favors write speed (a partial file is read at most once, by
//! [`crate::partitioner::Partitioner::final_flush_all`]) and is implemented as the Arrow IPC
//! *stream* format: no footer, sequential only. The final codec favors read speed and random
//! access and is implemented as the Arrow IPC *file* format ("Feather v2"), with the tile's
//! `extent` / `children` / `total_points` attached as schema-level metadata.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::ipc::reader::{FileReader, StreamReader};
use arrow::ipc::writer::{FileWriter, StreamWriter};
use arrow_schema::Schema;

use crate::error::TilerResult;
use crate::extent::Extent;

/// The machine-readable manifest embedded in a tile's final file.
pub struct TileMetadata {
    pub extent: Extent,
    pub children: Vec<String>,
    pub total_points: u64,
}

impl TileMetadata {
    fn into_schema_metadata(self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(3);
        map.insert("extent".to_string(), self.extent.to_json().to_string());
        map.insert(
            "children".to_string(),
            serde_json::Value::Array(self.children.into_iter().map(serde_json::Value::String).collect())
                .to_string(),
        );
        map.insert("total_points".to_string(), self.total_points.to_string());
        map
    }
}

/// Writes a tile's buffered batches to its partial (`.needs_metadata.feather`) path, using the
/// fast sequential stream codec. Re-entrant: calling this twice with the same batches produces
/// identical bytes.
pub fn write_partial(path: &Path, schema: &Arc<Schema>, batches: &[RecordBatch]) -> TilerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = StreamWriter::try_new(BufWriter::new(file), schema)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    Ok(())
}

/// Reads a tile's partial file back, in write order, for rewriting at final flush.
pub fn read_partial(path: &Path) -> TilerResult<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = StreamReader::try_new(file, None)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

/// Writes a tile's final, authoritative file: the footer-indexed file codec, with the tile's
/// manifest attached as schema-level custom metadata.
pub fn write_final(
    path: &Path,
    schema: &Arc<Schema>,
    batches: &[RecordBatch],
    metadata: TileMetadata,
) -> TilerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let schema_with_metadata = Arc::new(schema.as_ref().clone().with_metadata(metadata.into_schema_metadata()));
    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(BufWriter::new(file), &schema_with_metadata)?;
    for batch in batches {
        // The footer-indexed writer requires batches to share exactly the schema it was
        // opened with; re-tag each batch with the metadata-bearing schema.
        let retagged = RecordBatch::try_new(schema_with_metadata.clone(), batch.columns().to_vec())?;
        writer.write(&retagged)?;
    }
    writer.finish()?;
    Ok(())
}

/// Reads a final tile file back, used by overflow reinsertion and by tests.
pub fn read_final(path: &Path) -> TilerResult<(Vec<RecordBatch>, Arc<Schema>)> {
    let file = File::open(path)?;
    let reader = FileReader::try_new(file, None)?;
    let schema = reader.schema();
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((batches, schema))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float32Array, UInt64Array};
    use arrow_schema::{DataType, Field};
    use tempfile::tempdir;

    use super::*;

    fn sample_batch() -> (Arc<Schema>, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ix", DataType::UInt64, false),
            Field::new("x", DataType::Float32, false),
            Field::new("y", DataType::Float32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(UInt64Array::from(vec![0, 1, 2])),
                Arc::new(Float32Array::from(vec![0.1, 0.2, 0.3])),
                Arc::new(Float32Array::from(vec![0.4, 0.5, 0.6])),
            ],
        )
        .unwrap();
        (schema, batch)
    }

    #[test]
    fn partial_round_trips_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.needs_metadata.feather");
        let (schema, batch) = sample_batch();
        write_partial(&path, &schema, std::slice::from_ref(&batch)).unwrap();
        let read_back = read_partial(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].num_rows(), 3);
    }

    #[test]
    fn partial_write_is_idempotent_byte_for_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.needs_metadata.feather");
        let (schema, batch) = sample_batch();
        write_partial(&path, &schema, std::slice::from_ref(&batch)).unwrap();
        let first = std::fs::read(&path).unwrap();
        write_partial(&path, &schema, std::slice::from_ref(&batch)).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn final_file_embeds_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.feather");
        let (schema, batch) = sample_batch();
        let metadata = TileMetadata {
            extent: Extent::new(&["x", "y"], &[(0.0, 1.0), (0.0, 1.0)]),
            children: vec!["1/0/0".to_string()],
            total_points: 3,
        };
        write_final(&path, &schema, std::slice::from_ref(&batch), metadata).unwrap();
        let (batches, schema_out) = read_final(&path).unwrap();
        assert_eq!(batches[0].num_rows(), 3);
        assert_eq!(
            schema_out.metadata().get("total_points").map(String::as_str),
            Some("3")
        );
        assert_eq!(
            schema_out.metadata().get("children").map(String::as_str),
            Some("[\"1/0/0\"]")
        );
    }
}

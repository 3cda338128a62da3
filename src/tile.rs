//! The tile state machine: buffering, splitting, overflow, and the two flush phases.
//!
//! Each [`Tile`] owns an in-memory buffer, optionally an on-disk overflow stream, and optionally
//! `2^D` children. Insertion is strictly top-down; final flush is strictly bottom-up. No tile
//! ever mutates a sibling or a global. The only shared state is the [`ResourceMeter`] passed in
//! by mutable reference.

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{BooleanArray, Float32Array, RecordBatch};
use arrow::compute::{and, filter_record_batch};
use arrow_schema::Schema;

use crate::budget::{allocate_child_budgets, ResourceMeter};
use crate::coord::{Dimensionality, TileCoords};
use crate::error::{TilerError, TilerResult};
use crate::extent::Extent;
use crate::overflow::{self, OverflowWriter};
use crate::writer::{read_partial, write_final, write_partial, TileMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Unflushed,
    Partial,
    Final,
}

/// Configuration shared by every tile in a pyramid, threaded down by shared reference instead
/// of duplicated per node.
pub(crate) struct TileContext {
    pub dest: PathBuf,
    pub dims: Dimensionality,
    pub tile_size: usize,
    pub max_files: usize,
}

pub(crate) struct Tile {
    coords: TileCoords,
    extent: Extent,
    capacity: usize,
    schema: Option<Arc<Schema>>,
    buffer: Vec<RecordBatch>,
    buffer_rows: usize,
    children: Option<Vec<Tile>>,
    overflow: Option<OverflowWriter>,
    flush_state: FlushState,
    total_points: u64,
}

impl Tile {
    pub(crate) fn new(coords: TileCoords, extent: Extent, capacity: usize) -> Self {
        Tile {
            coords,
            extent,
            capacity,
            schema: None,
            buffer: Vec::new(),
            buffer_rows: 0,
            children: None,
            overflow: None,
            flush_state: FlushState::Unflushed,
            total_points: 0,
        }
    }

    pub(crate) fn coords(&self) -> &TileCoords {
        &self.coords
    }

    fn check_schema(&mut self, batch: &RecordBatch) -> TilerResult<()> {
        match &self.schema {
            None => {
                self.schema = Some(batch.schema());
                Ok(())
            }
            Some(existing) if existing.fields() == batch.schema().fields() => Ok(()),
            Some(existing) => Err(TilerError::SchemaMismatch {
                coords: self.coords.id(),
                detail: format!(
                    "expected {} fields, got {}",
                    existing.fields().len(),
                    batch.schema().fields().len()
                ),
            }),
        }
    }

    /// A tile's buffer rows must all lie within its extent. By construction
    /// `partition_to_children` never hands a tile rows outside its half, so this is a
    /// debug-only sanity check, not a load-bearing guard: paid for in debug builds, free in
    /// release.
    fn check_within_extent(&self, batch: &RecordBatch, axes: &[&str]) -> TilerResult<()> {
        if !cfg!(debug_assertions) {
            return Ok(());
        }
        let schema = batch.schema();
        let columns: Vec<&Float32Array> = axes
            .iter()
            .map(|&axis| {
                let idx = schema.index_of(axis).expect("axis column present in schema");
                batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .expect("axis column is Float32")
            })
            .collect();
        for row in 0..batch.num_rows() {
            let coords: Vec<f32> = columns.iter().map(|c| c.value(row)).collect();
            if !self.extent.contains(&coords) {
                return Err(TilerError::OutsideExtent(format!(
                    "{} row {row}: {coords:?} outside extent",
                    self.coords.id()
                )));
            }
        }
        Ok(())
    }

    /// Inserts `batch` (already globally dictionary-recoded and jittered by the caller),
    /// consuming up to `tile_budget` worth of new tiles across this subtree.
    pub(crate) fn insert(
        &mut self,
        mut batch: RecordBatch,
        mut tile_budget: f64,
        ctx: &TileContext,
        meter: &mut ResourceMeter,
    ) -> TilerResult<()> {
        self.check_schema(&batch)?;

        let room = self.capacity.saturating_sub(self.buffer_rows);
        let n_rows = batch.num_rows();
        if room > 0 && n_rows > 0 {
            let take_n = room.min(n_rows);

            // Reopening: this tile may have already been first-flushed and dropped from the
            // open-memory set (e.g. it is a sibling receiving rows reinserted from an
            // overflow drain). Re-register it so the meter still counts it as open.
            if self.flush_state == FlushState::Partial {
                self.flush_state = FlushState::Unflushed;
                meter.register_memory_tile(&self.coords);
            }

            let to_buffer = batch.slice(0, take_n);
            self.check_within_extent(&to_buffer, ctx.dims.axes())?;
            self.buffer.push(to_buffer);
            self.buffer_rows += take_n;
            batch = batch.slice(take_n, n_rows - take_n);
        }

        if batch.num_rows() == 0 {
            return Ok(());
        }

        let children_per_tile = ctx.dims.children_per_tile();

        if self.children.is_none() {
            if tile_budget >= children_per_tile as f64 {
                tile_budget -= children_per_tile as f64;
                self.create_children(ctx, meter);
            } else {
                self.append_overflow(&batch, ctx, meter)?;
                return Ok(());
            }
        }

        let axes = ctx.dims.axes();
        let midpoints = self.extent.midpoints();
        let frames = partition_to_children(&batch, axes, &midpoints, children_per_tile)?;
        let rows_per_child: Vec<usize> = frames.iter().map(RecordBatch::num_rows).collect();
        let budgets = allocate_child_budgets(tile_budget, &rows_per_child, children_per_tile);

        let children = self.children.as_mut().expect("children created above");
        for ((child, frame), child_budget) in children.iter_mut().zip(frames).zip(budgets) {
            if frame.num_rows() == 0 {
                continue;
            }
            child.insert(frame, child_budget, ctx, meter)?;
        }

        Ok(())
    }

    fn create_children(&mut self, ctx: &TileContext, meter: &mut ResourceMeter) {
        let midpoints = self.extent.midpoints();
        let children_per_tile = ctx.dims.children_per_tile();
        let mut children = Vec::with_capacity(children_per_tile);
        for child_index in 0..children_per_tile {
            let coords = self.coords.child(child_index);
            let extent = self.extent.child_extent(&midpoints, child_index);
            meter.register_memory_tile(&coords);
            children.push(Tile::new(coords, extent, ctx.tile_size));
        }
        self.children = Some(children);
    }

    fn append_overflow(
        &mut self,
        batch: &RecordBatch,
        ctx: &TileContext,
        meter: &mut ResourceMeter,
    ) -> TilerResult<()> {
        if self.overflow.is_none() {
            let schema = self
                .schema
                .clone()
                .expect("schema is set by check_schema before any routing happens");
            let path = self.coords.overflow_path(&ctx.dest);
            self.overflow = Some(OverflowWriter::open(&path, &schema)?);
            meter.register_overflow_file(&self.coords);
        }
        self.overflow
            .as_mut()
            .expect("just opened above")
            .write_batch(batch)
    }

    /// Writes this tile's buffer to its partial file, if it hasn't been flushed yet. Idempotent.
    pub(crate) fn first_flush(&mut self, ctx: &TileContext, meter: &mut ResourceMeter) -> TilerResult<()> {
        if self.flush_state != FlushState::Unflushed {
            return Ok(());
        }
        self.flush_state = FlushState::Partial;

        if self.buffer_rows == 0 {
            meter.unregister_memory_tile(&self.coords);
            return Ok(());
        }

        let schema = self
            .schema
            .clone()
            .expect("a tile with buffered rows has a schema");
        let path = self.coords.partial_path(&ctx.dest);
        write_partial(&path, &schema, &self.buffer)?;
        meter.unregister_memory_tile(&self.coords);
        Ok(())
    }

    pub(crate) fn first_flush_recursive(
        &mut self,
        ctx: &TileContext,
        meter: &mut ResourceMeter,
    ) -> TilerResult<()> {
        self.first_flush(ctx, meter)?;
        if let Some(children) = self.children.as_mut() {
            for child in children {
                child.first_flush_recursive(ctx, meter)?;
            }
        }
        Ok(())
    }

    /// Closes and reprocesses this tile's overflow stream (if any), then recurses into
    /// whatever children exist (its own, if it never overflowed, or the freshly-forced ones
    /// created by reinsertion).
    pub(crate) fn drain_overflow(&mut self, ctx: &TileContext, meter: &mut ResourceMeter) -> TilerResult<()> {
        if let Some(overflow) = self.overflow.take() {
            let path = overflow.close()?;
            meter.unregister_overflow_file(&self.coords);
            // A tile that had overflow never had children, since the two are mutually
            // exclusive for new data; this clear is defensive.
            self.children = None;

            let batches = overflow::drain(&path)?;
            std::fs::remove_file(&path)?;

            let children_per_tile = ctx.dims.children_per_tile() as f64;
            // Force child creation even under descriptor pressure: the reinserted rows need
            // somewhere to go regardless of current occupancy.
            let forced_budget = (ctx.max_files as f64 - meter.open_count() as f64).max(children_per_tile);

            for batch in batches {
                self.insert(batch, forced_budget, ctx, meter)?;
            }
            self.first_flush_recursive(ctx, meter)?;
        }

        if let Some(children) = self.children.as_mut() {
            for child in children {
                child.drain_overflow(ctx, meter)?;
            }
        }
        Ok(())
    }

    /// Post-order: children first, then this tile. Returns this subtree's total point count.
    pub(crate) fn final_flush(&mut self, ctx: &TileContext) -> TilerResult<u64> {
        let mut populated_children = Vec::new();
        let mut children_total: u64 = 0;
        if let Some(children) = self.children.as_mut() {
            for child in children {
                let points = child.final_flush(ctx)?;
                if points > 0 {
                    populated_children.push(child.coords.id());
                }
                children_total += points;
            }
        }

        let partial_path = self.coords.partial_path(&ctx.dest);
        let own_batches = match read_partial(&partial_path) {
            Ok(batches) => batches,
            Err(TilerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.children.is_some() {
                    return Err(TilerError::MissingPartialFile(self.coords.id()));
                }
                self.total_points = children_total;
                self.flush_state = FlushState::Final;
                return Ok(self.total_points);
            }
            Err(e) => return Err(e),
        };

        let own_rows: u64 = own_batches.iter().map(|b| b.num_rows() as u64).sum();
        self.total_points = own_rows + children_total;

        let schema = self
            .schema
            .clone()
            .expect("a tile with a written partial file has a schema");
        let metadata = TileMetadata {
            extent: self.extent.clone(),
            children: populated_children,
            total_points: self.total_points,
        };
        write_final(&self.coords.final_path(&ctx.dest), &schema, &own_batches, metadata)?;
        std::fs::remove_file(&partial_path)?;
        self.flush_state = FlushState::Final;
        Ok(self.total_points)
    }

    pub(crate) fn collect_summary(&self, out: &mut Vec<(String, u64)>) {
        out.push((self.coords.id(), self.total_points));
        if let Some(children) = &self.children {
            for child in children {
                child.collect_summary(out);
            }
        }
    }
}

/// Splits `batch` into `2^D` ordered subframes, one per child. Subframe `child_index` holds
/// the rows for which, on every axis `a`, `(value >= midpoints[a]) == bit a of child_index`;
/// ties at the midpoint go to the upper half.
fn partition_to_children(
    batch: &RecordBatch,
    axes: &[&str],
    midpoints: &[f32],
    children_per_tile: usize,
) -> TilerResult<Vec<RecordBatch>> {
    let schema = batch.schema();
    let axis_is_high: Vec<BooleanArray> = axes
        .iter()
        .enumerate()
        .map(|(axis_idx, &axis)| {
            let idx = schema.index_of(axis).expect("axis column present in schema");
            let col = batch
                .column(idx)
                .as_any()
                .downcast_ref::<Float32Array>()
                .expect("axis column is Float32");
            let mid = midpoints[axis_idx];
            col.iter().map(|v| v.map(|v| v >= mid)).collect()
        })
        .collect();

    let mut frames = Vec::with_capacity(children_per_tile);
    for child_index in 0..children_per_tile {
        let mut mask: Option<BooleanArray> = None;
        for (axis_idx, is_high) in axis_is_high.iter().enumerate() {
            let want_high = (child_index >> axis_idx) & 1 == 1;
            let matches_axis: BooleanArray = is_high.iter().map(|v| v.map(|v| v == want_high)).collect();
            mask = Some(match mask {
                None => matches_axis,
                Some(acc) => and(&acc, &matches_axis)?,
            });
        }
        let mask = mask.expect("at least one axis exists");
        frames.push(filter_record_batch(batch, &mask)?);
    }
    Ok(frames)
}

//! The partitioner: owns the root tile and the resource meter, and sequences the four phases
//! of a build (ingest, first flush, overflow drain, final flush).

use std::path::PathBuf;

use arrow::array::RecordBatch;

use crate::budget::ResourceMeter;
use crate::coord::{Dimensionality, TileCoords};
use crate::dictionary::GlobalDictionary;
use crate::error::TilerResult;
use crate::extent::Extent;
use crate::jitter;
use crate::tile::{Tile, TileContext};

/// Streaming, descriptor-bounded builder of a quadtree or octree tile pyramid.
///
/// A `Partitioner` is used by inserting batches one at a time (`insert`), then running the two
/// post-ingestion phases in order: [`Partitioner::first_flush_all`] to make every buffered tile
/// durable, [`Partitioner::drain_overflows`] to reinsert every spilled batch now that later
/// inserts have freed up descriptor budget, and [`Partitioner::final_flush_all`] to write the
/// authoritative, metadata-bearing files. [`Partitioner::run`] does all four in the right order
/// for callers who already have every batch in hand.
pub struct Partitioner {
    root: Tile,
    ctx: TileContext,
    meter: ResourceMeter,
    dictionary: GlobalDictionary,
}

impl Partitioner {
    /// Creates a new partitioner rooted at `extent`, writing under `dest`.
    ///
    /// `first_tile_size` bounds the root tile's own buffer; every other tile uses `tile_size`.
    /// `max_files` bounds the total number of simultaneously open memory buffers and overflow
    /// files: the descriptor budget the whole tree must respect.
    #[must_use]
    pub fn new(
        dest: impl Into<PathBuf>,
        extent: Extent,
        dims: Dimensionality,
        first_tile_size: usize,
        tile_size: usize,
        max_files: usize,
    ) -> Self {
        let ctx = TileContext {
            dest: dest.into(),
            dims,
            tile_size,
            max_files,
        };
        let mut meter = ResourceMeter::new();
        let root_coords = TileCoords::root(dims);
        meter.register_memory_tile(&root_coords);
        let root = Tile::new(root_coords, extent, first_tile_size);
        Partitioner {
            root,
            ctx,
            meter,
            dictionary: GlobalDictionary::default(),
        }
    }

    #[must_use]
    pub fn with_dictionary(mut self, dictionary: GlobalDictionary) -> Self {
        self.dictionary = dictionary;
        self
    }

    /// Recodes `batch`'s dictionary columns against the global table (a no-op if none was
    /// configured) and routes it into the tree.
    pub fn insert(&mut self, batch: RecordBatch) -> TilerResult<()> {
        let batch = self.dictionary.recode_batch(&batch)?;
        let budget = self.meter.remaining(self.ctx.max_files);
        log::debug!(
            "inserting {} rows, {} tiles open ({} overflow), budget {budget:.1}",
            batch.num_rows(),
            self.meter.open_count(),
            self.meter.open_overflow_count(),
        );
        self.root.insert(batch, budget, &self.ctx, &mut self.meter)
    }

    /// Writes every currently-buffered tile's partial file, freeing its memory slot. Idempotent
    /// per tile: calling this more than once only writes newly-(re)buffered tiles.
    pub fn first_flush_all(&mut self) -> TilerResult<()> {
        self.root.first_flush_recursive(&self.ctx, &mut self.meter)
    }

    /// Closes every open overflow stream, reinserting its rows now that descriptor pressure has
    /// usually eased (later siblings finished first-flushing and freed their memory slots).
    pub fn drain_overflows(&mut self) -> TilerResult<()> {
        self.root.drain_overflow(&self.ctx, &mut self.meter)
    }

    /// Writes every tile's final, metadata-bearing file, bottom-up, and removes partial files.
    pub fn final_flush_all(&mut self) -> TilerResult<()> {
        self.root.final_flush(&self.ctx)?;
        Ok(())
    }

    /// A flat `(tile id, point count)` listing of the whole tree, root first, in the same
    /// depth-first order tiles were created.
    #[must_use]
    pub fn summary(&self) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        self.root.collect_summary(&mut out);
        out
    }

    /// Runs a whole pyramid build end to end over batches and an extent the caller has already
    /// resolved (from an `ExtentOracle`, explicit `--limits`, or some mix of the two): jitters
    /// coincident points if `jitter_stddev > 0.0`, then drives ingestion and all three
    /// post-ingestion phases in order. This is the sequencing the CLI driver calls; it contains
    /// no policy beyond driving the four primitive operations above in order, so each stays
    /// independently testable.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        dest: impl Into<PathBuf>,
        dims: Dimensionality,
        first_tile_size: usize,
        tile_size: usize,
        max_files: usize,
        jitter_stddev: f32,
        batches: Vec<RecordBatch>,
        extent: Extent,
        dictionary: GlobalDictionary,
    ) -> TilerResult<Vec<(String, u64)>> {
        let axes = dims.axes();
        let mut partitioner =
            Partitioner::new(dest, extent, dims, first_tile_size, tile_size, max_files).with_dictionary(dictionary);

        let mut rng = rand::rng();
        let total = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let batch = jitter::apply_jitter(&batch, axes, jitter_stddev, &mut rng)?;
            log::info!("ingesting batch {}/{total} ({} rows)", i + 1, batch.num_rows());
            partitioner.insert(batch)?;
        }

        log::info!("first-flushing buffered tiles");
        partitioner.first_flush_all()?;
        log::info!("draining overflow streams");
        partitioner.drain_overflows()?;
        log::info!("writing final tiles");
        partitioner.final_flush_all()?;
        Ok(partitioner.summary())
    }
}

//! Streaming, descriptor-bounded quadtree/octree tile pyramid builder for point datasets.
//!
//! The core is [`Partitioner`]: it receives Arrow `RecordBatch`es, decides which tile each row
//! belongs to, buffers rows per tile up to a capacity, splits tiles that fill, spills overflow
//! to per-tile on-disk streams when the file-descriptor budget forbids creating children, later
//! reinserts those spills, and finally rewrites every tile with authoritative metadata
//! (`extent`, `children`, `total_points`). See `DESIGN.md` in the repository root for how each
//! module maps back to the original tool this crate reimplements.

mod budget;
mod coord;
mod dictionary;
mod error;
mod extent;
mod jitter;
mod overflow;
mod partitioner;
mod record_source;
mod tile;
mod writer;

pub use coord::{Dimensionality, TileCoords};
pub use dictionary::{GlobalDictionary, DEFAULT_MAX_DICTIONARY_SIZE};
pub use error::{TilerError, TilerResult};
pub use extent::{Extent, ExtentAccumulator};
pub use jitter::apply_jitter;
pub use partitioner::Partitioner;
pub use record_source::{feather_source, ExtentOracle, FeatherRecordSource, FixedExtent, RecordSource, ScanningExtentOracle};

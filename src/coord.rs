//! Tile coordinates and on-disk path layout.

use std::path::{Path, PathBuf};

/// The spatial dimensionality of a pyramid: quadtree (2D) or octree (3D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensionality {
    Quad,
    Oct,
}

impl Dimensionality {
    /// Axis names in the fixed tie-break order (x before y before z).
    #[must_use]
    pub fn axes(self) -> &'static [&'static str] {
        match self {
            Dimensionality::Quad => &["x", "y"],
            Dimensionality::Oct => &["x", "y", "z"],
        }
    }

    /// Number of spatial axes, `D`.
    #[must_use]
    pub fn ndim(self) -> usize {
        self.axes().len()
    }

    /// Number of children a split tile has, `2^D`.
    #[must_use]
    pub fn children_per_tile(self) -> usize {
        1 << self.ndim()
    }
}

/// Identifies one node of the partition tree: a depth plus one integer index per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCoords {
    pub depth: u32,
    pub indices: Vec<u64>,
}

impl TileCoords {
    #[must_use]
    pub fn root(dims: Dimensionality) -> Self {
        TileCoords {
            depth: 0,
            indices: vec![0; dims.ndim()],
        }
    }

    /// The coordinates of the `child_index`-th child, where `child_index` is interpreted as a
    /// `D`-bit mask: bit `a` set means "upper half along axis `a`".
    #[must_use]
    pub fn child(&self, child_index: usize) -> Self {
        let indices = self
            .indices
            .iter()
            .enumerate()
            .map(|(axis, &i)| {
                let bit = (child_index >> axis) & 1;
                i * 2 + u64::try_from(bit).expect("bit is 0 or 1")
            })
            .collect();
        TileCoords {
            depth: self.depth + 1,
            indices,
        }
    }

    /// The canonical id string used in metadata (`"depth/i/j"` or `"depth/i/j/k"`).
    #[must_use]
    pub fn id(&self) -> String {
        let mut parts = vec![self.depth.to_string()];
        parts.extend(self.indices.iter().map(ToString::to_string));
        parts.join("/")
    }

    /// The on-disk path for this tile's data file, before any suffix is appended.
    ///
    /// Layout: `<dest>/<depth>/<i>/<j>.feather` for 2D, extending with one directory level per
    /// extra axis. The last coordinate is always the file stem, the rest are directories.
    #[must_use]
    pub fn base_path(&self, dest: &Path) -> PathBuf {
        let mut path = dest.join(self.depth.to_string());
        for idx in &self.indices[..self.indices.len() - 1] {
            path.push(idx.to_string());
        }
        path.push(self.indices[self.indices.len() - 1].to_string());
        path
    }

    #[must_use]
    pub fn final_path(&self, dest: &Path) -> PathBuf {
        self.base_path(dest).with_extension("feather")
    }

    #[must_use]
    pub fn partial_path(&self, dest: &Path) -> PathBuf {
        let mut path = self.base_path(dest).into_os_string();
        path.push(".needs_metadata.feather");
        PathBuf::from(path)
    }

    #[must_use]
    pub fn overflow_path(&self, dest: &Path) -> PathBuf {
        let mut path = self.base_path(dest).into_os_string();
        path.push(".overflow.arrow");
        PathBuf::from(path)
    }
}

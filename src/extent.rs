//! Axis-aligned extents and the partition arithmetic that splits them.

use std::collections::BTreeMap;

use serde_json::Value;

/// A closed `[lo, hi]` interval per spatial axis, keyed by axis name (`"x"`, `"y"`, `"z"`).
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    bounds: Vec<(String, f32, f32)>,
}

impl Extent {
    #[must_use]
    pub fn new(axes: &[&str], bounds: &[(f32, f32)]) -> Self {
        assert_eq!(axes.len(), bounds.len(), "one bound per axis");
        Extent {
            bounds: axes
                .iter()
                .zip(bounds)
                .map(|(&name, &(lo, hi))| (name.to_string(), lo, hi))
                .collect(),
        }
    }

    #[must_use]
    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.bounds.iter().map(|(name, ..)| name.as_str())
    }

    #[must_use]
    pub fn get(&self, axis_index: usize) -> (f32, f32) {
        let (_, lo, hi) = self.bounds[axis_index];
        (lo, hi)
    }

    /// Midpoint of every axis, in fixed axis order (x, y, [z]).
    #[must_use]
    pub fn midpoints(&self) -> Vec<f32> {
        self.bounds.iter().map(|&(_, lo, hi)| (lo + hi) / 2.0).collect()
    }

    /// The extent of one child, given the parent midpoints and the child's bit mask
    /// (bit `a` set means "upper half along axis `a`").
    #[must_use]
    pub fn child_extent(&self, midpoints: &[f32], child_index: usize) -> Extent {
        let bounds = self
            .bounds
            .iter()
            .enumerate()
            .map(|(axis, &(ref name, lo, hi))| {
                let m = midpoints[axis];
                let (lo2, hi2) = if (child_index >> axis) & 1 == 0 {
                    (lo, m)
                } else {
                    (m, hi)
                };
                (name.clone(), lo2, hi2)
            })
            .collect();
        Extent { bounds }
    }

    /// Whether `(coord_0, coord_1, ...)` lies within this extent under the
    /// `[lo, hi]` closed rule used for storage-time sanity checks (not the strict `[lo, m)`
    /// split rule, which only matters when choosing a child).
    #[must_use]
    pub fn contains(&self, coords: &[f32]) -> bool {
        self.bounds
            .iter()
            .zip(coords)
            .all(|(&(_, lo, hi), &c)| c >= lo && c <= hi)
    }

    /// Render as the JSON object used in tile metadata: `{"x":[lo,hi],"y":[lo,hi],...}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, lo, hi) in &self.bounds {
            map.insert(
                name.clone(),
                Value::Array(vec![json_f32(*lo), json_f32(*hi)]),
            );
        }
        Value::Object(map)
    }
}

fn json_f32(v: f32) -> Value {
    serde_json::Number::from_f64(f64::from(v))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Accumulates a running min/max per axis; used by the reference `ExtentOracle` implementation.
#[derive(Debug, Default)]
pub struct ExtentAccumulator {
    bounds: BTreeMap<String, (f32, f32)>,
}

impl ExtentAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, axis: &str, value: f32) {
        if !value.is_finite() {
            return;
        }
        self.bounds
            .entry(axis.to_string())
            .and_modify(|(lo, hi)| {
                *lo = lo.min(value);
                *hi = hi.max(value);
            })
            .or_insert((value, value));
    }

    #[must_use]
    pub fn finish(self, axes: &[&str]) -> Extent {
        let bounds = axes
            .iter()
            .map(|&name| self.bounds.get(name).copied().unwrap_or((0.0, 0.0)))
            .collect::<Vec<_>>();
        Extent::new(axes, &bounds)
    }
}

//! Optional coincident-point decoalescing, applied once at ingestion time.
//!
//! A cluster of exactly-coincident points forces the partitioner into an unbounded-depth spine
//! (every split keeps routing the whole cluster to one child). Adding independent per-axis
//! Gaussian noise before the first insert breaks ties without disturbing a point's position
//! across the run: jitter is never reapplied on overflow reinsertion, since by then the point
//! already has its one jittered position baked into the batch that gets spilled and reread.

use arrow::array::{ArrayRef, Float32Array, RecordBatch};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

use crate::error::TilerResult;

/// Adds `Normal(0, stddev)` noise to every axis column present in `batch`'s schema. A `stddev`
/// of `0.0` is a no-op (returns `batch` unchanged) so callers can always call this
/// unconditionally.
pub fn apply_jitter(
    batch: &RecordBatch,
    axes: &[&str],
    stddev: f32,
    rng: &mut impl Rng,
) -> TilerResult<RecordBatch> {
    if stddev <= 0.0 {
        return Ok(batch.clone());
    }
    let normal = Normal::new(0.0, f64::from(stddev)).expect("stddev > 0");
    let schema = batch.schema();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    for &axis in axes {
        let Ok(idx) = schema.index_of(axis) else {
            continue;
        };
        let col = columns[idx]
            .as_any()
            .downcast_ref::<Float32Array>()
            .expect("axis column is Float32");
        let jittered: Float32Array = col
            .iter()
            .map(|v| v.map(|v| v + normal.sample(rng) as f32))
            .collect();
        columns[idx] = Arc::new(jittered);
    }
    Ok(RecordBatch::try_new(schema, columns)?)
}

#[cfg(test)]
mod tests {
    use arrow::array::UInt64Array;
    use arrow_schema::{DataType, Field, Schema};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ix", DataType::UInt64, false),
            Field::new("x", DataType::Float32, false),
            Field::new("y", DataType::Float32, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt64Array::from(vec![0, 1, 2])),
                Arc::new(Float32Array::from(vec![0.5, 0.5, 0.5])),
                Arc::new(Float32Array::from(vec![0.5, 0.5, 0.5])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn zero_stddev_is_a_no_op() {
        let b = batch();
        let mut rng = StdRng::seed_from_u64(1);
        let out = apply_jitter(&b, &["x", "y"], 0.0, &mut rng).unwrap();
        let x = out.column(1).as_any().downcast_ref::<Float32Array>().unwrap();
        assert_eq!(x.values(), &[0.5, 0.5, 0.5]);
    }

    #[test]
    fn positive_stddev_breaks_up_coincident_points() {
        let b = batch();
        let mut rng = StdRng::seed_from_u64(1);
        let out = apply_jitter(&b, &["x", "y"], 1e-3, &mut rng).unwrap();
        let x = out.column(1).as_any().downcast_ref::<Float32Array>().unwrap();
        let distinct: std::collections::HashSet<_> = x.values().iter().map(|v| v.to_bits()).collect();
        assert!(distinct.len() > 1, "jitter should separate previously-coincident points");
    }
}

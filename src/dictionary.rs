//! Global dictionary recoding: the external collaborator that gives every tile a shared
//! dictionary code table.
//!
//! Each tile writes dictionary-typed columns against one shared value table so that two tiles'
//! indices refer to the same string. Building that table (tallying frequency, picking the
//! `D_max - 1` most common values plus an `"<Other>"` sentinel) is this module's job; the
//! partitioner just calls [`DictionaryRecoder::recode_batch`] once per incoming batch, before
//! any row routing.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, DictionaryArray, RecordBatch, StringArray, UInt16Array};
use arrow::compute::take;
use arrow::datatypes::UInt16Type;
use arrow_schema::DataType;

use crate::error::TilerResult;

/// The default maximum number of distinct dictionary codes per column, including the sentinel.
/// Matches the constant used by the original tiler this crate was distilled from.
pub const DEFAULT_MAX_DICTIONARY_SIZE: usize = 4095;

const SENTINEL_VALUE: &str = "<Other>";

/// The codebook for one dictionary column: an ordered value table plus the reverse lookup.
#[derive(Debug, Clone)]
struct ColumnDictionary {
    values: Vec<String>,
    index: HashMap<String, u16>,
    other_index: u16,
}

impl ColumnDictionary {
    fn from_counts(counts: HashMap<String, u64>, d_max: usize) -> Self {
        let mut by_count: Vec<(String, u64)> = counts.into_iter().collect();
        // Most frequent first; break ties by value so the table is deterministic across runs.
        by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        by_count.truncate(d_max.saturating_sub(1));

        let mut values: Vec<String> = by_count.into_iter().map(|(v, _)| v).collect();
        let other_index = u16::try_from(values.len()).expect("d_max fits in u16");
        values.push(SENTINEL_VALUE.to_string());

        let index = values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), u16::try_from(i).expect("d_max fits in u16")))
            .collect();

        ColumnDictionary {
            values,
            index,
            other_index,
        }
    }

    fn lookup(&self, value: Option<&str>) -> u16 {
        value
            .and_then(|v| self.index.get(v).copied())
            .unwrap_or(self.other_index)
    }
}

/// A global, cross-shard dictionary table for every dictionary-typed column in a schema.
#[derive(Debug, Clone, Default)]
pub struct GlobalDictionary {
    columns: HashMap<String, ColumnDictionary>,
}

impl GlobalDictionary {
    /// Builds a table by tallying value frequency over one pass of `batches`.
    #[must_use]
    pub fn build_from_batches(batches: &[RecordBatch], d_max: usize) -> Self {
        let mut per_column: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for batch in batches {
            for (i, field) in batch.schema().fields().iter().enumerate() {
                if !matches!(field.data_type(), DataType::Dictionary(_, _)) {
                    continue;
                }
                let Some(dict_arr) = batch
                    .column(i)
                    .as_any()
                    .downcast_ref::<DictionaryArray<UInt16Type>>()
                else {
                    continue;
                };
                let Some(values) = dict_arr.values().as_any().downcast_ref::<StringArray>() else {
                    continue;
                };
                let counts = per_column.entry(field.name().clone()).or_default();
                for key in dict_arr.keys().iter().flatten() {
                    let value = values.value(key as usize);
                    *counts.entry(value.to_string()).or_insert(0) += 1;
                }
            }
        }

        let columns = per_column
            .into_iter()
            .map(|(name, counts)| (name, ColumnDictionary::from_counts(counts, d_max)))
            .collect();
        GlobalDictionary { columns }
    }

    #[must_use]
    pub fn is_recoded_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Returns the `(values, key->index)` table for one column.
    #[must_use]
    pub fn table_for(&self, name: &str) -> Option<(&[String], &HashMap<String, u16>)> {
        self.columns.get(name).map(|c| (c.values.as_slice(), &c.index))
    }

    /// Rewrites every dictionary column in `batch` against this shared table. Columns not
    /// present in the table (e.g. no dictionary columns at all) pass through unchanged.
    pub fn recode_batch(&self, batch: &RecordBatch) -> TilerResult<RecordBatch> {
        if self.columns.is_empty() {
            return Ok(batch.clone());
        }
        let schema = batch.schema();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
        for (i, field) in schema.fields().iter().enumerate() {
            let col = batch.column(i);
            match self.columns.get(field.name()) {
                Some(col_dict) => columns.push(recode_column(col, col_dict)?),
                None => columns.push(col.clone()),
            }
        }
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

fn recode_column(col: &ArrayRef, col_dict: &ColumnDictionary) -> TilerResult<ArrayRef> {
    let Some(dict_arr) = col.as_any().downcast_ref::<DictionaryArray<UInt16Type>>() else {
        // Not dictionary-encoded (e.g. a plain string column); leave it untouched.
        return Ok(col.clone());
    };
    let Some(values) = dict_arr.values().as_any().downcast_ref::<StringArray>() else {
        return Ok(col.clone());
    };

    // old tile-local index -> new global index
    let remap: Vec<u16> = (0..values.len())
        .map(|i| col_dict.lookup((!values.is_null(i)).then(|| values.value(i))))
        .collect();
    let remap = UInt16Array::from(remap);

    let new_keys = take(&remap, dict_arr.keys(), None)?;
    let new_keys = new_keys
        .as_any()
        .downcast_ref::<UInt16Array>()
        .expect("take over UInt16Array preserves type")
        .clone();
    let new_values: ArrayRef = Arc::new(StringArray::from(col_dict.values.clone()));
    let new_dict = DictionaryArray::<UInt16Type>::try_new(new_keys, new_values)?;
    Ok(Arc::new(new_dict))
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    fn dict_batch(values: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "country",
            DataType::Dictionary(Box::new(DataType::UInt16), Box::new(DataType::Utf8)),
            true,
        )]));
        let array: DictionaryArray<UInt16Type> = values.into_iter().collect();
        RecordBatch::try_new(schema, vec![Arc::new(array)]).unwrap()
    }

    #[test]
    fn out_of_table_values_map_to_the_sentinel() {
        let batch = dict_batch(vec!["US", "US", "FR", "FR", "FR", "DE"]);
        let dict = GlobalDictionary::build_from_batches(std::slice::from_ref(&batch), 3); // 2 real + sentinel
        let (values, _) = dict.table_for("country").unwrap();
        assert_eq!(values, ["FR", "US", "<Other>"]);

        let recoded = dict.recode_batch(&batch).unwrap();
        let col = recoded
            .column(0)
            .as_any()
            .downcast_ref::<DictionaryArray<UInt16Type>>()
            .unwrap();
        let out_values = col
            .values()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let decoded: Vec<_> = col
            .keys()
            .iter()
            .map(|k| out_values.value(k.unwrap() as usize).to_string())
            .collect();
        assert_eq!(decoded, vec!["US", "US", "FR", "FR", "FR", "<Other>"]);
    }

    #[test]
    fn columns_absent_from_the_table_pass_through() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float32, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::Float32Array::from(vec![1.0]))],
        )
        .unwrap();
        let dict = GlobalDictionary::default();
        let recoded = dict.recode_batch(&batch).unwrap();
        assert_eq!(recoded.num_rows(), 1);
    }
}

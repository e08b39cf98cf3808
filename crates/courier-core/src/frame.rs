use std::collections::BTreeSet;

use courier_redcap::{KeySpec, Record, RecordId, RecordKey, RECORD_ID_COLUMN, REPEAT_INSTANCE_FIELD};
use polars::prelude::*;
use tracing::warn;

/// Flattens exported records into one string column per field. Identifiers
/// are typed here, once: `record_id` and `redcap_repeat_instance` become
/// `Int64`; rows whose identifier does not normalize are dropped. Empty
/// values are stored as nulls.
pub fn records_to_frame(records: &[Record]) -> PolarsResult<DataFrame> {
    let mut field_names: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        field_names.extend(record.fields.keys().map(String::as_str));
    }
    field_names.remove(RECORD_ID_COLUMN);
    field_names.remove(REPEAT_INSTANCE_FIELD);

    let mut kept: Vec<(&Record, RecordId)> = Vec::with_capacity(records.len());
    for record in records {
        match record.record_id() {
            Some(id) => kept.push((record, id)),
            None => warn!(record = %record.record, "dropping row with non-integer record id"),
        }
    }

    let ids: Vec<i64> = kept.iter().map(|(_, id)| id.get()).collect();
    let instances: Vec<Option<i64>> = kept.iter().map(|(record, _)| record.repeat_instance).collect();

    let mut columns: Vec<Column> = Vec::with_capacity(field_names.len() + 2);
    columns.push(Series::new(RECORD_ID_COLUMN.into(), ids).into());
    columns.push(Series::new(REPEAT_INSTANCE_FIELD.into(), instances).into());
    for name in field_names {
        let values: Vec<Option<String>> = kept
            .iter()
            .map(|(record, _)| record.value(name).map(str::to_string))
            .collect();
        columns.push(Series::new(name.into(), values).into());
    }

    DataFrame::new(columns)
}

/// Builds a string table from rows of optional cells, one per column.
pub fn frame_from_rows(columns: &[&str], rows: &[Vec<Option<String>>]) -> PolarsResult<DataFrame> {
    let series: Vec<Column> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(idx).cloned().flatten())
                .collect();
            Series::new((*name).into(), values).into()
        })
        .collect();
    DataFrame::new(series)
}

/// Adds every missing column as an all-null string column.
pub fn ensure_columns(df: &DataFrame, columns: &[&str]) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    let height = out.height();
    for name in columns {
        if out.column(name).is_err() {
            out.with_column(Series::full_null((*name).into(), height, &DataType::String))?;
        }
    }
    Ok(out)
}

fn key_values(column: &Column) -> PolarsResult<Vec<Option<i64>>> {
    match column.dtype() {
        DataType::String => Ok(column
            .str()?
            .into_iter()
            .map(|value| value.and_then(RecordId::parse).map(RecordId::get))
            .collect()),
        DataType::Int64 => Ok(column.i64()?.into_iter().collect()),
        _ => {
            let cast = column.cast(&DataType::Float64)?;
            Ok(cast
                .f64()?
                .into_iter()
                .map(|value| value.filter(|v| v.fract() == 0.0).map(|v| v as i64))
                .collect())
        }
    }
}

/// Types the key columns as `Int64` and drops rows with an unparseable key.
pub fn normalize_keys(df: &DataFrame, key: KeySpec) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    for name in key.columns() {
        let values = key_values(df.column(name)?)?;
        out.with_column(Series::new((*name).into(), values))?;
    }

    let mut keep = lit(true);
    for name in key.columns() {
        keep = keep.and(col(*name).is_not_null());
    }
    let before = out.height();
    let normalized = out.lazy().filter(keep).collect()?;
    let dropped = before - normalized.height();
    if dropped > 0 {
        warn!(dropped, "dropped rows with unparseable keys");
    }
    Ok(normalized)
}

/// Keys of a frame whose key columns are already normalized.
pub fn record_keys(df: &DataFrame, key: KeySpec) -> PolarsResult<Vec<RecordKey>> {
    let records = df.column(RECORD_ID_COLUMN)?.i64()?;
    let instances = match key {
        KeySpec::Record => None,
        KeySpec::RecordInstance => Some(df.column(REPEAT_INSTANCE_FIELD)?.i64()?),
    };

    let mut keys = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let Some(record) = records.get(idx) else {
            continue;
        };
        keys.push(RecordKey {
            record: RecordId(record),
            instance: instances.and_then(|column| column.get(idx)),
        });
    }
    Ok(keys)
}

pub fn filter(df: &DataFrame, predicate: Expr) -> PolarsResult<DataFrame> {
    df.clone().lazy().filter(predicate).collect()
}

fn any_to_text(value: AnyValue<'_>) -> Option<String> {
    match value {
        AnyValue::Null => None,
        AnyValue::String(text) => Some(text.to_string()),
        AnyValue::StringOwned(text) => Some(text.to_string()),
        other => Some(other.to_string()),
    }
    .filter(|text| !text.is_empty())
}

/// Non-empty cell text, or `None` when the column or value is missing.
pub fn cell(df: &DataFrame, column: &str, idx: usize) -> Option<String> {
    let column = df.column(column).ok()?;
    column.get(idx).ok().and_then(any_to_text)
}

#[derive(Clone, Copy)]
pub struct RowView<'a> {
    df: &'a DataFrame,
    idx: usize,
}

impl<'a> RowView<'a> {
    pub fn new(df: &'a DataFrame, idx: usize) -> Self {
        Self { df, idx }
    }

    pub fn get(&self, column: &str) -> Option<String> {
        cell(self.df, column, self.idx)
    }
}

pub fn rows(df: &DataFrame) -> impl Iterator<Item = RowView<'_>> {
    (0..df.height()).map(move |idx| RowView::new(df, idx))
}

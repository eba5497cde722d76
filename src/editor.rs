//! The editor pipeline: an ordered sequence of stages that turns a raw
//! extract into a validated, renamed, and typed frame.
//!
//! Each stage takes the frame by value and returns the next version of it, so
//! stages can be exercised in isolation and a failing stage short-circuits the
//! whole chain. [`run`] applies stages 1 through 8 in their required order;
//! [`drop_excluded_columns`] is applied separately by the caller, after the
//! full frame has been persisted.

use std::collections::{BTreeSet, HashSet};

use itertools::Itertools;
use log::{debug, info, warn};
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};

use crate::{
    columns::{ColumnMapping, DataType},
    customer::Customer,
    data::{Value, is_null_token, parse_day_first_date},
    error::{PipelineError, Result},
    frame::{Cell, Frame},
};

/// Source column carrying the tenant identifier of each row.
pub const CONCERN_COLUMN: &str = "PARConcern";
/// Display name of the transaction date column.
pub const DATE_COLUMN: &str = "Pvm";
/// Display name of the transaction time column.
pub const TIME_COLUMN: &str = "Kello";

/// Runs stages 1 to 8 for `customer` over a copy of `raw`.
pub fn run(raw: &Frame, customer: &Customer) -> Result<Frame> {
    let target_row_count = raw.len().saturating_sub(1);
    let mapping = customer.mapping();
    debug!(
        "Editing {} raw row(s) for customer '{}'",
        raw.len(),
        customer.name()
    );

    let frame = delete_row(raw.clone(), 0)?;
    let frame = validate_concern_number(frame, customer.name(), &customer.config.concern_ids)?;
    let frame = drop_unmapped_columns(frame, mapping);
    let frame = reorder_columns(frame, mapping);
    let frame = rename_and_cast_datatypes(frame, mapping)?;
    let frame = format_date_and_time(frame)?;
    let frame = normalize_null_values(frame);
    validate_final_frame(frame, mapping, target_row_count, customer.name())
}

/// Removes the row at `idx` and resets the row labels to `0..n`.
pub fn delete_row(mut frame: Frame, idx: usize) -> Result<Frame> {
    frame.drop_row(idx)?;
    Ok(frame)
}

/// Fails unless every value of [`CONCERN_COLUMN`] belongs to `allowed`.
/// Values are compared as text; a null cell compares as the empty string.
pub fn validate_concern_number(
    frame: Frame,
    customer_name: &str,
    allowed: &BTreeSet<i64>,
) -> Result<Frame> {
    let values = frame
        .column_values(CONCERN_COLUMN)
        .ok_or_else(|| PipelineError::MissingColumn(CONCERN_COLUMN.to_string()))?;
    let allowed: HashSet<String> = allowed.iter().map(|id| id.to_string()).collect();

    let offending: BTreeSet<String> = values
        .into_iter()
        .map(|cell| cell.as_ref().map(Value::as_display).unwrap_or_default())
        .filter(|value| !allowed.contains(value))
        .collect();

    if offending.is_empty() {
        return Ok(frame);
    }
    Err(PipelineError::validation(
        customer_name,
        vec![format!(
            "Invalid concern values found: {}",
            offending.iter().map(|v| format!("'{v}'")).join(", ")
        )],
    ))
}

/// Drops every column that is not a source key of the mapping.
pub fn drop_unmapped_columns(mut frame: Frame, mapping: &ColumnMapping) -> Frame {
    let dropped = frame.drop_columns_where(|name| !mapping.is_allowed_source(name));
    if !dropped.is_empty() {
        info!("Dropping unmapped columns: {dropped:?}");
    }
    frame
}

/// Orders columns by the mapping's allowed-column order. Allowed keys absent
/// from the frame are skipped.
pub fn reorder_columns(frame: Frame, mapping: &ColumnMapping) -> Frame {
    let positions: Vec<usize> = mapping
        .allowed_columns()
        .iter()
        .flat_map(|(source, _)| frame.column_positions(source))
        .collect();
    frame.select_positions(&positions)
}

/// Renames source columns to their display names and casts every column with
/// a declared type.
pub fn rename_and_cast_datatypes(mut frame: Frame, mapping: &ColumnMapping) -> Result<Frame> {
    let renames: Vec<(usize, String)> = frame
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(pos, name)| mapping.display_name(name).map(|d| (pos, d.to_string())))
        .collect();
    for (pos, display) in renames {
        frame.rename_column_at(pos, &display);
    }

    let typed: Vec<(usize, String, DataType)> = frame
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(pos, name)| {
            mapping
                .dtype_map()
                .get(name)
                .map(|dtype| (pos, name.clone(), dtype.clone()))
        })
        .collect();

    for (pos, column, dtype) in typed {
        match dtype {
            DataType::Float { decimals } => {
                frame.try_map_column(pos, |cell| cast_float(&column, cell, decimals))?
            }
            DataType::Int => frame.try_map_column(pos, |cell| cast_int(&column, cell))?,
            DataType::String { .. } => {}
        }
    }
    Ok(frame)
}

fn cast_float(column: &str, cell: Cell, decimals: Option<u32>) -> Result<Cell> {
    let value = match cell {
        None => f64::NAN,
        Some(Value::Float(f)) => f,
        Some(Value::Integer(i)) => i as f64,
        Some(Value::Boolean(b)) => f64::from(u8::from(b)),
        Some(Value::String(text)) => {
            if is_null_token(&text) {
                f64::NAN
            } else {
                text.trim()
                    .replace(',', ".")
                    .parse::<f64>()
                    .map_err(|_| cast_error(column, &text, "float"))?
            }
        }
        Some(Value::Date(date)) => return Err(cast_error(column, &date.to_string(), "float")),
    };
    let value = match decimals {
        Some(decimals) => round_to(value, decimals),
        None => value,
    };
    Ok(Some(Value::Float(value)))
}

fn cast_int(column: &str, cell: Cell) -> Result<Cell> {
    let value = match cell {
        None => return Err(cast_error(column, "", "int")),
        Some(Value::Integer(i)) => i,
        Some(Value::Float(f)) if f.is_finite() => f.trunc() as i64,
        Some(Value::Boolean(b)) => i64::from(b),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| cast_error(column, &text, "int"))?,
        Some(other) => return Err(cast_error(column, &other.as_display(), "int")),
    };
    Ok(Some(Value::Integer(value)))
}

fn cast_error(column: &str, value: &str, dtype: &str) -> PipelineError {
    PipelineError::Cast {
        column: column.to_string(),
        value: value.to_string(),
        dtype: dtype.to_string(),
    }
}

/// Rounds half-to-even at `decimals` places. Non-finite values pass through.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(decimals))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Normalizes [`DATE_COLUMN`] to calendar dates and [`TIME_COLUMN`] to
/// `HH:MM`. Absent columns are skipped.
pub fn format_date_and_time(mut frame: Frame) -> Result<Frame> {
    if let Some(pos) = frame.column_position(DATE_COLUMN) {
        frame.try_map_column(pos, format_date)?;
    }
    if let Some(pos) = frame.column_position(TIME_COLUMN) {
        frame.try_map_column(pos, format_time)?;
    }
    Ok(frame)
}

fn format_date(cell: Cell) -> Result<Cell> {
    let text = match cell {
        None => return Ok(None),
        Some(Value::Date(date)) => return Ok(Some(Value::Date(date))),
        Some(value) => value.as_display(),
    };
    if is_null_token(&text) {
        return Ok(None);
    }
    parse_day_first_date(&text)
        .map(|date| Some(Value::Date(date)))
        .ok_or_else(|| PipelineError::InvalidDate {
            column: DATE_COLUMN.to_string(),
            value: text,
        })
}

/// Accepts `H:M` or `H:M:S` and keeps the hour and minute, zero-padded.
fn format_time(cell: Cell) -> Result<Cell> {
    let text = match cell {
        None => return Ok(None),
        Some(value) => value.as_display(),
    };
    if is_null_token(&text) {
        return Ok(None);
    }
    let invalid = || PipelineError::InvalidTime {
        column: TIME_COLUMN.to_string(),
        value: text.clone(),
    };
    let parts: Vec<&str> = text.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(invalid());
    }
    let hour: u32 = parts[0].trim().parse().map_err(|_| invalid())?;
    let minute: u32 = parts[1].trim().parse().map_err(|_| invalid())?;
    Ok(Some(Value::String(format!("{hour:02}:{minute:02}"))))
}

/// Replaces every NaN float with a null cell.
pub fn normalize_null_values(mut frame: Frame) -> Frame {
    for cell in frame.cells_mut() {
        if cell.as_ref().is_some_and(Value::is_nan) {
            *cell = None;
        }
    }
    frame
}

/// Terminal structural gate. Missing columns are logged as a warning; every
/// other problem is collected and reported in a single validation error.
pub fn validate_final_frame(
    frame: Frame,
    mapping: &ColumnMapping,
    target_row_count: usize,
    customer_name: &str,
) -> Result<Frame> {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let missing: Vec<&str> = mapping
        .display_names()
        .filter(|name| !frame.has_column(name))
        .collect();
    if !missing.is_empty() {
        warnings.push(format!(
            "These base columns were not found in the frame: {missing:?}"
        ));
    }

    if frame.is_empty() {
        errors.push("Frame is empty after processing".to_string());
    }

    let allowed: HashSet<&str> = mapping.display_names().collect();
    let extras: BTreeSet<&str> = frame
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|name| !allowed.contains(name))
        .collect();
    if !extras.is_empty() {
        errors.push(format!(
            "Unexpected extra columns in final frame: {:?}",
            extras.iter().collect::<Vec<_>>()
        ));
    }

    if frame.columns().iter().unique().count() != frame.columns().len() {
        errors.push("Duplicate column names detected in final frame".to_string());
    }

    if frame.len() != target_row_count {
        errors.push(format!(
            "Row count mismatch: expected {target_row_count}, got {}",
            frame.len()
        ));
    }

    let index = frame.index();
    if index.iter().unique().count() != index.len() {
        errors.push("Frame index contains duplicates".to_string());
    }
    if !index.iter().copied().eq(0..frame.len()) {
        errors.push("Frame index is not a contiguous range 0..n-1".to_string());
    }

    if !errors.is_empty() {
        return Err(PipelineError::validation(customer_name, errors));
    }
    if !warnings.is_empty() {
        warn!("Customer: {customer_name}\n{}", warnings.join("\n"));
    }
    Ok(frame)
}

/// Removes the publish-excluded display columns from a processed frame.
pub fn drop_excluded_columns(mut frame: Frame, excluded: &[String]) -> Frame {
    let dropped = frame.drop_columns_where(|name| excluded.iter().any(|e| e == name));
    if !dropped.is_empty() {
        debug!("Excluding columns from published extract: {dropped:?}");
    }
    frame
}

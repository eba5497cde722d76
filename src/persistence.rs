//! Cumulative per-customer history tables.
//!
//! [`Persistence`] is the narrow contract the pipeline needs: make sure a
//! table has the right columns, upsert rows by key, and read everything back.
//! [`HistoryStore`] layers the customer-level rules (table naming, the key
//! column, zero-weight filtering) on top of any backend.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use encoding_rs::UTF_8;
use log::{debug, info};

use crate::{
    builder::build_csv,
    columns::{ColumnCatalog, ColumnMapping, ColumnSpec, DataType},
    data::Value,
    error::{PipelineError, Result},
    frame::{Cell, Frame},
    io_utils::{SOURCE_DELIMITER, read_frame},
};

/// Row identity column of every history table.
pub const KEY_COLUMN: &str = "TapahtumaId";
/// Rows whose weight is exactly zero are not stored.
pub const WEIGHT_COLUMN: &str = "Paino";
const KEY_LENGTH: u32 = 255;

pub trait Persistence {
    /// Creates `table` with `columns`, or adds the columns it lacks.
    fn ensure_schema(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()>;
    /// Inserts or replaces rows matched on `key_column`; returns the number
    /// of rows written.
    fn upsert(&mut self, table: &str, frame: &Frame, key_column: &str) -> Result<usize>;
    fn fetch_all(&self, table: &str) -> Result<Frame>;
}

/// Column-typed rows of one table. Column names are display names.
#[derive(Debug, Clone, Default, PartialEq)]
struct Table {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    fn add_missing_columns(&mut self, columns: &[ColumnSpec]) -> usize {
        let mut added = 0;
        for spec in columns {
            if self.columns.iter().any(|c| c.display_name == spec.display_name) {
                continue;
            }
            self.columns.push(spec.clone());
            for row in &mut self.rows {
                row.push(None);
            }
            added += 1;
        }
        added
    }

    fn upsert(&mut self, frame: &Frame, key_column: &str) -> Result<usize> {
        let key_pos = self
            .columns
            .iter()
            .position(|c| c.display_name == key_column)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "Key column '{key_column}' is not part of the table"
                ))
            })?;
        let sources: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| frame.column_position(&c.display_name))
            .collect();

        let mut by_key: HashMap<String, usize> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row[key_pos].as_ref().map(|k| (k.as_display(), idx)))
            .collect();

        let mut written = 0;
        for (ordinal, row) in frame.rows().iter().enumerate() {
            let record: Vec<Cell> = self
                .columns
                .iter()
                .zip(&sources)
                .map(|(spec, source)| {
                    source.and_then(|pos| coerce_cell(row[pos].clone(), &spec.data_type))
                })
                .collect();
            let key = record[key_pos].as_ref().map(Value::as_display).ok_or_else(|| {
                PipelineError::Malformed(format!("Row {ordinal} has no '{key_column}' value"))
            })?;
            match by_key.get(&key) {
                Some(existing) => self.rows[*existing] = record,
                None => {
                    by_key.insert(key, self.rows.len());
                    self.rows.push(record);
                }
            }
            written += 1;
        }
        Ok(written)
    }

    fn to_frame(&self) -> Result<Frame> {
        let columns = self.columns.iter().map(|c| c.display_name.clone()).collect();
        Frame::from_rows(columns, self.rows.clone())
    }
}

/// Converts a cell to the storage type of its column. Values that do not
/// convert are kept as they are.
fn coerce_cell(cell: Cell, data_type: &DataType) -> Cell {
    let value = cell?;
    if value.is_nan() {
        return None;
    }
    let coerced = match (data_type, &value) {
        (DataType::Float { .. }, Value::String(text)) => {
            text.trim().parse::<f64>().ok().map(Value::Float)
        }
        (DataType::Float { .. }, Value::Integer(i)) => Some(Value::Float(*i as f64)),
        (DataType::Int, Value::String(text)) => text.trim().parse::<i64>().ok().map(Value::Integer),
        (DataType::Int, Value::Float(f)) if f.is_finite() => Some(Value::Integer(f.trunc() as i64)),
        (DataType::String { .. }, Value::String(_)) => None,
        (DataType::String { .. }, other) => Some(Value::String(other.as_display())),
        _ => None,
    };
    Some(coerced.unwrap_or(value))
}

/// Tables held in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tables: BTreeMap<String, Table>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

impl Persistence for MemoryPersistence {
    fn ensure_schema(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .add_missing_columns(columns);
        Ok(())
    }

    fn upsert(&mut self, table: &str, frame: &Frame, key_column: &str) -> Result<usize> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| PipelineError::Configuration(format!("Table '{table}' does not exist")))?
            .upsert(frame, key_column)
    }

    fn fetch_all(&self, table: &str) -> Result<Frame> {
        self.tables
            .get(table)
            .ok_or_else(|| PipelineError::Configuration(format!("Table '{table}' does not exist")))?
            .to_frame()
    }
}

/// One `;`-delimited CSV file per table plus a `<table>.columns.json`
/// sidecar with the column types.
#[derive(Debug, Clone)]
pub struct CsvPersistence {
    dir: PathBuf,
}

impl CsvPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvPersistence { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.columns.json"))
    }

    fn load(&self, table: &str) -> Result<Option<Table>> {
        let schema_path = self.schema_path(table);
        if !schema_path.exists() {
            return Ok(None);
        }
        let catalog: ColumnCatalog = serde_json::from_slice(&fs::read(&schema_path)?)?;
        let columns: Vec<ColumnSpec> = catalog.iter().cloned().collect();

        let data_path = self.data_path(table);
        let rows = if data_path.exists() {
            let stored = read_frame(&fs::read(&data_path)?, SOURCE_DELIMITER, UTF_8)?;
            if stored.columns().len() != columns.len() {
                return Err(PipelineError::Malformed(format!(
                    "Table '{table}' has {} stored column(s) but {} declared",
                    stored.columns().len(),
                    columns.len()
                )));
            }
            stored
                .rows()
                .iter()
                .map(|row| {
                    row.iter()
                        .zip(&columns)
                        .map(|(cell, spec)| coerce_cell(cell.clone(), &spec.data_type))
                        .collect()
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(Some(Table { columns, rows }))
    }

    fn store(&self, table: &str, contents: &Table) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let catalog: ColumnCatalog = contents
            .columns
            .iter()
            .map(|spec| {
                let mut spec = spec.clone();
                spec.source_key = spec.display_name.clone();
                spec
            })
            .collect();
        fs::write(self.schema_path(table), serde_json::to_vec_pretty(&catalog)?)?;
        fs::write(self.data_path(table), build_csv(&contents.to_frame()?)?)?;
        Ok(())
    }
}

impl Persistence for CsvPersistence {
    fn ensure_schema(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        let mut contents = self.load(table)?.unwrap_or_default();
        let added = contents.add_missing_columns(columns);
        if added > 0 {
            debug!("Added {added} column(s) to table '{table}'");
            self.store(table, &contents)?;
        }
        Ok(())
    }

    fn upsert(&mut self, table: &str, frame: &Frame, key_column: &str) -> Result<usize> {
        let mut contents = self
            .load(table)?
            .ok_or_else(|| PipelineError::Configuration(format!("Table '{table}' does not exist")))?;
        let written = contents.upsert(frame, key_column)?;
        self.store(table, &contents)?;
        Ok(written)
    }

    fn fetch_all(&self, table: &str) -> Result<Frame> {
        self.load(table)?
            .ok_or_else(|| PipelineError::Configuration(format!("Table '{table}' does not exist")))?
            .to_frame()
    }
}

/// Customer history on top of a [`Persistence`] backend.
pub struct HistoryStore<P> {
    backend: P,
}

impl<P: Persistence> HistoryStore<P> {
    pub fn new(backend: P) -> Self {
        HistoryStore { backend }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    /// Table name for a customer: `-` and spaces become `_`.
    pub fn table_name(customer: &str) -> String {
        customer.replace(['-', ' '], "_")
    }

    fn schema_for(mapping: &ColumnMapping) -> Vec<ColumnSpec> {
        let key = ColumnSpec::new(
            KEY_COLUMN,
            KEY_COLUMN,
            DataType::String {
                length: Some(KEY_LENGTH),
            },
        );
        std::iter::once(key)
            .chain(
                mapping
                    .columns()
                    .iter()
                    .filter(|spec| spec.display_name != KEY_COLUMN)
                    .cloned(),
            )
            .collect()
    }

    pub fn ensure_table(&mut self, customer: &str, mapping: &ColumnMapping) -> Result<()> {
        self.backend
            .ensure_schema(&Self::table_name(customer), &Self::schema_for(mapping))
    }

    /// Stores `frame` for `customer`. Zero-weight rows are skipped.
    pub fn upsert_rows(
        &mut self,
        customer: &str,
        frame: &Frame,
        mapping: &ColumnMapping,
    ) -> Result<usize> {
        if !frame.has_column(KEY_COLUMN) {
            return Err(PipelineError::MissingColumn(KEY_COLUMN.to_string()));
        }
        self.ensure_table(customer, mapping)?;
        let rows = match frame.column_position(WEIGHT_COLUMN) {
            Some(pos) => {
                frame.filter_rows(|row| row[pos].as_ref().and_then(Value::as_f64) != Some(0.0))
            }
            None => frame.clone(),
        };
        let skipped = frame.len() - rows.len();
        if skipped > 0 {
            debug!("Skipping {skipped} zero-weight row(s) for '{customer}'");
        }
        let written = self
            .backend
            .upsert(&Self::table_name(customer), &rows, KEY_COLUMN)?;
        info!("Upserted {written} row(s) into history of '{customer}'");
        Ok(written)
    }

    pub fn fetch(&self, customer: &str) -> Result<Frame> {
        self.backend.fetch_all(&Self::table_name(customer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mapping() -> ColumnMapping {
        let base: ColumnCatalog = [
            ColumnSpec::new("Id", KEY_COLUMN, DataType::String { length: None }),
            ColumnSpec::new("Weight", WEIGHT_COLUMN, DataType::Float { decimals: Some(3) }),
            ColumnSpec::new("Code", "EWCkoodi", DataType::String { length: Some(10) }),
        ]
        .into_iter()
        .collect();
        ColumnMapping::build(&base, &ColumnCatalog::new(), &[]).unwrap()
    }

    fn batch(rows: &[(&str, f64, &str)]) -> Frame {
        Frame::from_rows(
            vec![KEY_COLUMN.into(), WEIGHT_COLUMN.into(), "EWCkoodi".into()],
            rows.iter()
                .map(|(id, weight, code)| {
                    vec![
                        Some(Value::String(id.to_string())),
                        Some(Value::Float(*weight)),
                        Some(Value::String(code.to_string())),
                    ]
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn upsert_replaces_rows_by_key_and_skips_zero_weight() {
        let mut store = HistoryStore::new(MemoryPersistence::new());
        store
            .upsert_rows("acme-oy", &batch(&[("1", 2.0, "a"), ("2", 0.0, "b")]), &mapping())
            .unwrap();
        store
            .upsert_rows("acme-oy", &batch(&[("1", 5.0, "c"), ("3", 1.5, "d")]), &mapping())
            .unwrap();

        let history = store.fetch("acme-oy").unwrap();
        assert_eq!(store.backend().table_names(), vec!["acme_oy".to_string()]);
        assert_eq!(history.columns()[0], KEY_COLUMN);
        assert_eq!(history.len(), 2);
        assert_eq!(history.cell(0, WEIGHT_COLUMN), Some(&Value::Float(5.0)));
        assert_eq!(history.cell(1, "EWCkoodi"), Some(&Value::String("d".into())));
    }

    #[test]
    fn upsert_requires_key_column() {
        let mut store = HistoryStore::new(MemoryPersistence::new());
        let frame = Frame::from_text(&[WEIGHT_COLUMN], &[vec!["1"]]).unwrap();
        let err = store.upsert_rows("acme", &frame, &mapping()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(col) if col == KEY_COLUMN));
    }

    #[test]
    fn csv_backend_persists_and_migrates_columns() {
        let dir = tempdir().unwrap();
        {
            let mut store = HistoryStore::new(CsvPersistence::new(dir.path()));
            store
                .upsert_rows("acme", &batch(&[("1", 2.5, "170101*")]), &mapping())
                .unwrap();
        }

        let mut backend = CsvPersistence::new(dir.path());
        backend
            .ensure_schema(
                "acme",
                &[ColumnSpec::new("Note", "Note", DataType::String { length: None })],
            )
            .unwrap();
        let history = backend.fetch_all("acme").unwrap();
        assert_eq!(
            history.columns(),
            &[KEY_COLUMN.to_string(), WEIGHT_COLUMN.into(), "EWCkoodi".into(), "Note".into()]
        );
        assert_eq!(history.cell(0, WEIGHT_COLUMN), Some(&Value::Float(2.5)));
        assert_eq!(history.cell(0, "EWCkoodi"), Some(&Value::String("170101*".into())));
        assert!(history.cell(0, "Note").is_none());
    }

    #[test]
    fn fetching_unknown_table_fails() {
        let backend = MemoryPersistence::new();
        assert!(backend.fetch_all("nobody").is_err());
    }
}

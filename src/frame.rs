//! Row-oriented working table threaded through the editor pipeline.
//!
//! A [`Frame`] keeps its column names (duplicates allowed, so validation can
//! detect them), its rows of optional typed cells, and an explicit row index.
//! The index mirrors the positional labels of the rows: [`Frame::drop_row`]
//! resets it to `0..n`, and final validation checks that it is still unique
//! and contiguous.

use itertools::Itertools;

use crate::{
    data::Value,
    error::{PipelineError, Result},
};

pub type Cell = Option<Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    index: Vec<usize>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Frame {
            columns,
            rows: Vec::new(),
            index: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut frame = Frame::new(columns);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Builds a frame of string cells; empty strings become nulls.
    pub fn from_text<S: AsRef<str>>(columns: &[&str], rows: &[Vec<S>]) -> Result<Self> {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| {
                        let cell = cell.as_ref();
                        if cell.is_empty() {
                            None
                        } else {
                            Some(Value::String(cell.to_string()))
                        }
                    })
                    .collect()
            })
            .collect();
        Frame::from_rows(columns, rows)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::Malformed(format!(
                "row {} has {} field(s) but the frame has {} column(s)",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        let next = self.index.last().map(|last| last + 1).unwrap_or(0);
        self.rows.push(row);
        self.index.push(next);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    /// Overrides the row labels. Only used to model frames whose labels were
    /// disturbed upstream.
    pub fn set_index(&mut self, index: Vec<usize>) -> Result<()> {
        if index.len() != self.rows.len() {
            return Err(PipelineError::Malformed(format!(
                "index has {} label(s) for {} row(s)",
                index.len(),
                self.rows.len()
            )));
        }
        self.index = index;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_positions(&self, name: &str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() == name)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Cells of the first column called `name`.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Cell>> {
        let pos = self.column_position(name)?;
        Some(self.rows.iter().map(|row| &row[pos]).collect())
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&Value> {
        let pos = self.column_position(name)?;
        self.rows.get(row).and_then(|r| r[pos].as_ref())
    }

    /// Removes the row at position `idx` and relabels the rest `0..n`.
    pub fn drop_row(&mut self, idx: usize) -> Result<()> {
        if idx >= self.rows.len() {
            return Err(PipelineError::RowOutOfRange {
                index: idx,
                rows: self.rows.len(),
            });
        }
        self.rows.remove(idx);
        self.index = (0..self.rows.len()).collect();
        Ok(())
    }

    /// Keeps only the columns at `positions`, in that order.
    pub fn select_positions(&self, positions: &[usize]) -> Frame {
        let columns = positions.iter().map(|p| self.columns[*p].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| positions.iter().map(|p| row[*p].clone()).collect())
            .collect();
        Frame {
            columns,
            rows,
            index: self.index.clone(),
        }
    }

    /// Drops every column whose name satisfies `predicate`; returns the
    /// distinct names removed.
    pub fn drop_columns_where<F>(&mut self, predicate: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|idx| !predicate(&self.columns[*idx]))
            .collect();
        let dropped: Vec<String> = self
            .columns
            .iter()
            .filter(|c| predicate(c))
            .unique()
            .cloned()
            .collect();
        *self = self.select_positions(&keep);
        dropped
    }

    pub fn rename_column_at(&mut self, pos: usize, name: &str) {
        self.columns[pos] = name.to_string();
    }

    /// Replaces every cell of column `pos` with the result of `f`.
    pub fn try_map_column<F>(&mut self, pos: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Cell) -> Result<Cell>,
    {
        for row in &mut self.rows {
            let cell = row[pos].take();
            row[pos] = f(cell)?;
        }
        Ok(())
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.rows.iter_mut().flat_map(|row| row.iter_mut())
    }

    /// Rows satisfying `predicate`, relabelled `0..n`.
    pub fn filter_rows<F>(&self, predicate: F) -> Frame
    where
        F: Fn(&[Cell]) -> bool,
    {
        let rows: Vec<Vec<Cell>> = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        let index = (0..rows.len()).collect();
        Frame {
            columns: self.columns.clone(),
            rows,
            index,
        }
    }

    /// Appends a column filled with nulls when it does not exist yet.
    pub fn ensure_column(&mut self, name: &str) {
        if self.has_column(name) {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_text(
            &["a", "b", "a"],
            &[vec!["1", "x", "2"], vec!["3", "", "4"], vec!["5", "z", "6"]],
        )
        .unwrap()
    }

    #[test]
    fn drop_row_relabels_remaining_rows() {
        let mut frame = sample();
        frame.drop_row(0).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.index(), &[0, 1]);
        assert_eq!(frame.cell(0, "a"), Some(&Value::String("3".into())));
        assert!(frame.cell(0, "b").is_none());
    }

    #[test]
    fn drop_row_out_of_range_is_an_error() {
        let mut frame = Frame::new(vec!["a".into()]);
        let err = frame.drop_row(0).unwrap_err();
        assert!(matches!(err, PipelineError::RowOutOfRange { index: 0, rows: 0 }));
    }

    #[test]
    fn drop_columns_where_removes_duplicates_too() {
        let mut frame = sample();
        let dropped = frame.drop_columns_where(|name| name == "a");
        assert_eq!(dropped, vec!["a".to_string()]);
        assert_eq!(frame.columns(), &["b".to_string()]);
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut frame = Frame::new(vec!["a".into(), "b".into()]);
        assert!(frame.push_row(vec![None]).is_err());
    }

    #[test]
    fn filter_rows_relabels() {
        let frame = sample();
        let filtered = frame.filter_rows(|row| row[1].is_some());
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.index(), &[0, 1]);
    }
}

#![forbid(unsafe_code)]

use std::collections::HashSet;

use sc_types::{
    count_na, fill_na, parse_date, relaxed_dtype, zero_for_dtype, NullKind, Scalar, ScalarKey,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("column '{name}' length ({column_len}) does not match frame length ({frame_len})")]
    LengthMismatch {
        name: String,
        column_len: usize,
        frame_len: usize,
    },
    #[error("duplicate column name '{name}'")]
    DuplicateColumn { name: String },
    #[error("row mask length ({mask_len}) does not match frame length ({frame_len})")]
    MaskLengthMismatch { mask_len: usize, frame_len: usize },
}

/// A bounded table of rows: named columns of scalars in read order.
/// One chunk of the sales CSV materializes as one `Frame`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Vec<Scalar>>,
}

impl Frame {
    pub fn new(columns: Vec<(String, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let frame_len = columns.first().map_or(0, |(_, values)| values.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        let mut seen = HashSet::new();
        for (name, values) in columns {
            if !seen.insert(name.clone()) {
                return Err(FrameError::DuplicateColumn { name });
            }
            if values.len() != frame_len {
                return Err(FrameError::LengthMismatch {
                    name,
                    column_len: values.len(),
                    frame_len,
                });
            }
            names.push(name);
            data.push(values);
        }
        Ok(Self {
            names,
            columns: data,
        })
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Scalar]> {
        self.position(name).map(|pos| self.columns[pos].as_slice())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Append a column, or replace it in place when the name already exists.
    pub fn with_column(
        &self,
        name: impl Into<String>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        if values.len() != self.n_rows() {
            return Err(FrameError::LengthMismatch {
                name,
                column_len: values.len(),
                frame_len: self.n_rows(),
            });
        }
        let mut out = self.clone();
        match out.position(&name) {
            Some(pos) => out.columns[pos] = values,
            None => {
                out.names.push(name);
                out.columns.push(values);
            }
        }
        Ok(out)
    }

    fn take_rows(&self, positions: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|values| positions.iter().map(|&pos| values[pos].clone()).collect())
            .collect();
        Self {
            names: self.names.clone(),
            columns,
        }
    }

    // ── Cleaning ───────────────────────────────────────────────────────

    /// Drop exact-duplicate rows, keeping the first occurrence. Missing
    /// values compare equal to each other, NaN included.
    #[must_use]
    pub fn dedup_rows(&self) -> Self {
        let row_count = self.n_rows();
        let mut seen: HashSet<Vec<ScalarKey<'_>>> = HashSet::with_capacity(row_count);
        let mut keep = Vec::with_capacity(row_count);
        for row in 0..row_count {
            let key: Vec<ScalarKey<'_>> = self.columns.iter().map(|col| col[row].key()).collect();
            if seen.insert(key) {
                keep.push(row);
            }
        }
        if keep.len() == row_count {
            return self.clone();
        }
        self.take_rows(&keep)
    }

    /// Replace missing values with the zero/empty sentinel of each column's
    /// relaxed dtype. Date columns are left absent rather than invented.
    #[must_use]
    pub fn fill_missing(&self) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|values| {
                if count_na(values) == 0 {
                    return values.clone();
                }
                let sentinel = zero_for_dtype(relaxed_dtype(values));
                fill_na(values, &sentinel)
            })
            .collect();
        Self {
            names: self.names.clone(),
            columns,
        }
    }

    /// Coerce the named column to calendar dates in place: parseable text
    /// and existing dates pass through, everything else becomes absent.
    /// A no-op when the column does not exist.
    #[must_use]
    pub fn parse_dates(&self, name: &str) -> Self {
        let Some(pos) = self.position(name) else {
            return self.clone();
        };
        let mut out = self.clone();
        out.columns[pos] = out.columns[pos]
            .iter()
            .map(|value| match value {
                Scalar::Date(d) => Scalar::Date(*d),
                Scalar::Utf8(text) => match parse_date(text) {
                    Some(date) => Scalar::Date(date),
                    None => Scalar::Null(NullKind::NaT),
                },
                _ => Scalar::Null(NullKind::NaT),
            })
            .collect();
        out
    }

    // ── Row selection ──────────────────────────────────────────────────

    /// Keep rows whose mask entry is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self, FrameError> {
        if mask.len() != self.n_rows() {
            return Err(FrameError::MaskLengthMismatch {
                mask_len: mask.len(),
                frame_len: self.n_rows(),
            });
        }
        let positions: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(pos, keep)| if *keep { Some(pos) } else { None })
            .collect();
        Ok(self.take_rows(&positions))
    }

    /// The first `n` rows (all rows when `n` exceeds the frame).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        if n >= self.n_rows() {
            return self.clone();
        }
        let columns = self
            .columns
            .iter()
            .map(|values| values[..n].to_vec())
            .collect();
        Self {
            names: self.names.clone(),
            columns,
        }
    }
}

/// Concatenate frames row-wise. Columns are unioned in first-seen order;
/// a frame lacking a column contributes missing values for its rows.
pub fn concat_frames(frames: &[Frame]) -> Result<Frame, FrameError> {
    if frames.is_empty() {
        return Ok(Frame::default());
    }

    let total_len: usize = frames.iter().map(Frame::n_rows).sum();
    let mut union_names: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for frame in frames {
        for name in frame.column_names() {
            if seen.insert(name.clone()) {
                union_names.push(name.clone());
            }
        }
    }

    let mut columns = Vec::with_capacity(union_names.len());
    for name in &union_names {
        let mut values = Vec::with_capacity(total_len);
        for frame in frames {
            match frame.column(name) {
                Some(existing) => values.extend_from_slice(existing),
                None => {
                    for _ in 0..frame.n_rows() {
                        values.push(Scalar::Null(NullKind::Null));
                    }
                }
            }
        }
        columns.push((name.clone(), values));
    }

    Frame::new(columns)
}

#![forbid(unsafe_code)]

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use csv::{Reader, ReaderBuilder, StringRecord, WriterBuilder};
use sc_frame::{Frame, FrameError};
use sc_types::{NullKind, Scalar};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("input file '{path}' is missing or unreadable: {source}")]
    MissingInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

fn parse_scalar(field: &str) -> Scalar {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Scalar::Null(NullKind::Null);
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Scalar::Float64(value);
    }
    if let Ok(value) = trimmed.parse::<bool>() {
        return Scalar::Bool(value);
    }

    Scalar::Utf8(trimmed.to_owned())
}

fn header_names<R: io::Read>(reader: &mut Reader<R>) -> Result<Vec<String>, IoError> {
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }
    Ok(headers.iter().map(str::to_owned).collect())
}

fn push_record(columns: &mut [Vec<Scalar>], record: &StringRecord) {
    for (idx, column) in columns.iter_mut().enumerate() {
        column.push(parse_scalar(record.get(idx).unwrap_or_default()));
    }
}

fn read_all<R: io::Read>(mut reader: Reader<R>, row_hint: usize) -> Result<Frame, IoError> {
    let headers = header_names(&mut reader)?;
    let mut columns: Vec<Vec<Scalar>> = (0..headers.len())
        .map(|_| Vec::with_capacity(row_hint))
        .collect();

    for row in reader.records() {
        let record = row?;
        push_record(&mut columns, &record);
    }

    Ok(Frame::new(headers.into_iter().zip(columns).collect())?)
}

pub fn read_csv_str(input: &str) -> Result<Frame, IoError> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    // Capacity hint from byte length avoids reallocation for typical CSVs.
    let row_hint = input.len() / 16;
    read_all(reader, row_hint)
}

pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Frame, IoError> {
    let path = path.as_ref();
    let file = open_input(path)?;
    let reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    read_all(reader, 0)
}

fn open_input(path: &Path) -> Result<File, IoError> {
    File::open(path).map_err(|source| IoError::MissingInput {
        path: path.to_path_buf(),
        source,
    })
}

/// Render a frame back to CSV text, columns in frame order, missing values
/// as empty fields.
pub fn write_csv_string(frame: &Frame) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(frame.column_names())?;

    let columns: Vec<&[Scalar]> = frame
        .column_names()
        .iter()
        .filter_map(|name| frame.column(name))
        .collect();
    for row_idx in 0..frame.n_rows() {
        let row = columns
            .iter()
            .map(|values| values[row_idx].display_string().unwrap_or_default())
            .collect::<Vec<_>>();
        writer.write_record(&row)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

// ── Chunked streaming ──────────────────────────────────────────────────

/// Streams a sales CSV as bounded `Frame`s of at most `chunk_size` rows,
/// reading one chunk's worth of records at a time. The final chunk may be
/// shorter; an exhausted or empty source yields nothing.
#[derive(Debug)]
pub struct ChunkedCsvReader<R: io::Read> {
    reader: Reader<R>,
    headers: Vec<String>,
    chunk_size: usize,
    record: StringRecord,
    done: bool,
}

impl ChunkedCsvReader<File> {
    pub fn from_path(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, IoError> {
        let file = open_input(path.as_ref())?;
        Self::from_reader(file, chunk_size)
    }
}

impl<R: io::Read> ChunkedCsvReader<R> {
    pub fn from_reader(source: R, chunk_size: usize) -> Result<Self, IoError> {
        if chunk_size == 0 {
            return Err(IoError::InvalidChunkSize);
        }
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(source);
        let headers = header_names(&mut reader)?;
        Ok(Self {
            reader,
            headers,
            chunk_size,
            record: StringRecord::new(),
            done: false,
        })
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_chunk(&mut self) -> Result<Option<Frame>, IoError> {
        let mut columns: Vec<Vec<Scalar>> = (0..self.headers.len())
            .map(|_| Vec::with_capacity(self.chunk_size.min(1024)))
            .collect();

        let mut rows = 0;
        while rows < self.chunk_size {
            if !self.reader.read_record(&mut self.record)? {
                break;
            }
            push_record(&mut columns, &self.record);
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }

        let frame = Frame::new(self.headers.iter().cloned().zip(columns).collect())?;
        Ok(Some(frame))
    }
}

impl<R: io::Read> Iterator for ChunkedCsvReader<R> {
    type Item = Result<Frame, IoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

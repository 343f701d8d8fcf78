#![forbid(unsafe_code)]

use sc_frame::{concat_frames, Frame, FrameError};

/// Retains the first few chunks of a load for later inspection.
///
/// The collector accepts up to `chunk_budget` chunks and the finalized
/// sample is additionally capped at `row_cap` rows. What comes out is a
/// contiguous prefix of the cleaned dataset; it is deliberately cheap and
/// deterministic, not statistically representative.
#[derive(Debug, Clone)]
pub struct SampleCollector {
    chunk_budget: usize,
    row_cap: usize,
    retained: Vec<Frame>,
}

impl SampleCollector {
    #[must_use]
    pub fn new(chunk_budget: usize, row_cap: usize) -> Self {
        Self {
            chunk_budget,
            row_cap,
            retained: Vec::with_capacity(chunk_budget.min(16)),
        }
    }

    /// Whether the collector still accepts chunks. Callers use this to skip
    /// enrichment work once the budget is spent.
    #[must_use]
    pub fn wants_more(&self) -> bool {
        self.retained.len() < self.chunk_budget
    }

    /// Retain a chunk if the budget allows. Returns whether it was kept.
    pub fn offer(&mut self, chunk: Frame) -> bool {
        if !self.wants_more() {
            return false;
        }
        self.retained.push(chunk);
        true
    }

    #[must_use]
    pub fn retained_chunks(&self) -> usize {
        self.retained.len()
    }

    pub fn finalize(self) -> Result<Sample, FrameError> {
        let source_chunks = self.retained.len();
        let stacked = concat_frames(&self.retained)?;
        let truncated = stacked.n_rows() > self.row_cap;
        let frame = if truncated {
            stacked.head(self.row_cap)
        } else {
            stacked
        };
        Ok(Sample {
            frame,
            source_chunks,
            truncated,
        })
    }
}

/// The finalized sample: a row-capped concatenation of the retained chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    frame: Frame,
    source_chunks: usize,
    truncated: bool,
}

impl Sample {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            frame: Frame::default(),
            source_chunks: 0,
            truncated: false,
        }
    }

    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.frame.n_rows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// How many chunks fed the sample before the row cap applied.
    #[must_use]
    pub fn source_chunks(&self) -> usize {
        self.source_chunks
    }

    /// Whether the row cap cut the concatenated chunks short.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

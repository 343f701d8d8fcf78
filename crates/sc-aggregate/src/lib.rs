#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::mem::size_of;
use std::path::Path;

use bumpalo::{collections::Vec as BumpVec, Bump};
use chrono::NaiveDate;
use sc_frame::{Frame, FrameError};
use sc_io::{ChunkedCsvReader, IoError};
use sc_lookup::{EntityId, LookupTable, SalesLookups, CITY_LOOKUP, PRODUCT_LOOKUP};
use sc_sample::{Sample, SampleCollector};
use sc_types::{strict_sum, NullKind, Scalar, ScalarKey, TypeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info};

/// Column names the pipeline recognizes in the sales CSV. Anything else is
/// carried through untouched.
pub const DATE_COLUMN: &str = "date";
pub const REVENUE_COLUMN: &str = "revenue";
pub const PRODUCT_ID_COLUMN: &str = "product_id";
pub const STORE_ID_COLUMN: &str = "store_id";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("dataset contained no rows")]
    EmptyDataset,
    #[error("failed to process chunk {chunk_index}: {source}")]
    Processing {
        chunk_index: usize,
        #[source]
        source: ProcessingError,
    },
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

// ── Options ────────────────────────────────────────────────────────────

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_SAMPLE_CHUNK_BUDGET: usize = 3;
pub const DEFAULT_SAMPLE_ROW_CAP: usize = 50_000;
pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for GroupExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationOptions {
    pub chunk_size: usize,
    pub sample_chunk_budget: usize,
    pub sample_row_cap: usize,
    pub exec: GroupExecutionOptions,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sample_chunk_budget: DEFAULT_SAMPLE_CHUNK_BUDGET,
            sample_row_cap: DEFAULT_SAMPLE_ROW_CAP,
            exec: GroupExecutionOptions::default(),
        }
    }
}

// ── Progress ───────────────────────────────────────────────────────────

pub const PROGRESS_STEP: f64 = 0.1;
pub const PROGRESS_STREAM_CAP: f64 = 0.9;

/// Advance one step per chunk, holding at the cap until the stream ends.
#[must_use]
pub fn progress_fraction(chunk_index: usize) -> f64 {
    (chunk_index as f64 * PROGRESS_STEP).min(PROGRESS_STREAM_CAP)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    ChunkProcessed {
        chunk_index: usize,
        rows: usize,
        fraction: f64,
    },
    Completed {
        chunks: usize,
        transactions: u64,
        fraction: f64,
    },
}

/// Callers observe chunk-by-chunk progress through this seam; the pipeline
/// itself stays free of any presentation concern.
pub trait ProgressObserver {
    fn observe(&mut self, event: ProgressEvent);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn observe(&mut self, _event: ProgressEvent) {}
}

// ── Revenue ledgers ────────────────────────────────────────────────────

/// Running name → revenue totals that iterate in first-seen insertion
/// order. Downstream tie-breaks depend on that order being stable across
/// the whole pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevenueLedger {
    slots: HashMap<String, usize>,
    entries: Vec<(String, f64)>,
}

impl RevenueLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, amount: f64) {
        let name = name.into();
        match self.slots.get(&name) {
            Some(&slot) => self.entries[slot].1 += amount,
            None => {
                self.slots.insert(name.clone(), self.entries.len());
                self.entries.push((name, amount));
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.slots.get(name).map(|&slot| self.entries[slot].1)
    }

    /// Entries in first-seen order.
    #[must_use]
    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(name, revenue)| (name.as_str(), *revenue))
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, revenue)| revenue).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerEntry {
    name: String,
    revenue: f64,
}

// Serialized as an ordered array; a JSON object would lose first-seen order.
impl Serialize for RevenueLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|(name, revenue)| LedgerEntry {
            name: name.clone(),
            revenue: *revenue,
        }))
    }
}

impl<'de> Deserialize<'de> for RevenueLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<LedgerEntry>::deserialize(deserializer)?;
        let mut ledger = Self::new();
        for entry in entries {
            ledger.add(entry.name, entry.revenue);
        }
        Ok(ledger)
    }
}

// ── Per-chunk grouping ─────────────────────────────────────────────────

const DENSE_INT_KEY_RANGE_LIMIT: i128 = 65_536;

/// Estimate intermediate memory for one chunk's grouping (ordering vector
/// plus hash-map entry overhead).
fn estimate_group_intermediate_bytes(input_rows: usize) -> usize {
    input_rows.saturating_mul(
        size_of::<f64>()
            .saturating_add(size_of::<usize>())
            .saturating_add(64),
    )
}

/// Sum `revenues` per distinct key, emitting groups in first-seen order.
/// Missing keys are skipped; missing revenue contributes nothing; any other
/// non-numeric revenue is an error. Intermediates go through a bump arena
/// when the estimate fits the configured budget.
pub fn group_revenue_by_key(
    keys: &[Scalar],
    revenues: &[Scalar],
    exec: GroupExecutionOptions,
) -> Result<Vec<(EntityId, f64)>, TypeError> {
    if let Some(dense) = try_group_sum_dense_int(keys, revenues)? {
        return Ok(dense);
    }

    let estimated_bytes = estimate_group_intermediate_bytes(keys.len());
    if exec.use_arena && estimated_bytes <= exec.arena_budget_bytes {
        group_sum_with_arena(keys, revenues)
    } else {
        group_sum_with_global_allocator(keys, revenues)
    }
}

/// Dense fast path: all non-missing keys are Int64 within a small range,
/// so sums live in flat vectors indexed by key offset.
fn try_group_sum_dense_int(
    keys: &[Scalar],
    revenues: &[Scalar],
) -> Result<Option<Vec<(EntityId, f64)>>, TypeError> {
    let mut min_key = i64::MAX;
    let mut max_key = i64::MIN;
    let mut saw_key = false;
    for key in keys {
        match key {
            Scalar::Int64(v) => {
                min_key = min_key.min(*v);
                max_key = max_key.max(*v);
                saw_key = true;
            }
            other if other.is_missing() => {}
            _ => return Ok(None),
        }
    }
    if !saw_key {
        return Ok(Some(Vec::new()));
    }
    let range = i128::from(max_key) - i128::from(min_key) + 1;
    if range > DENSE_INT_KEY_RANGE_LIMIT {
        return Ok(None);
    }

    let slots = range as usize;
    let mut sums = vec![0.0_f64; slots];
    let mut seen = vec![false; slots];
    let mut ordering = Vec::new();

    for (key, value) in keys.iter().zip(revenues) {
        let offset = match key {
            Scalar::Int64(v) => (v - min_key) as usize,
            _ => continue,
        };
        if !seen[offset] {
            seen[offset] = true;
            ordering.push(offset);
        }
        if value.is_missing() {
            continue;
        }
        sums[offset] += value.to_f64()?;
    }

    Ok(Some(
        ordering
            .into_iter()
            .map(|offset| {
                (
                    EntityId::Int64(min_key + offset as i64),
                    sums[offset],
                )
            })
            .collect(),
    ))
}

fn group_sum_with_global_allocator(
    keys: &[Scalar],
    revenues: &[Scalar],
) -> Result<Vec<(EntityId, f64)>, TypeError> {
    let mut ordering = Vec::<ScalarKey<'_>>::new();
    let mut slot = HashMap::<ScalarKey<'_>, (usize, f64)>::new();

    for (pos, (key, value)) in keys.iter().zip(revenues).enumerate() {
        if key.is_missing() {
            continue;
        }
        let key_id = key.key();
        let entry = slot.entry(key_id).or_insert_with(|| {
            ordering.push(key_id);
            (pos, 0.0)
        });
        if value.is_missing() {
            continue;
        }
        entry.1 += value.to_f64()?;
    }

    Ok(emit_group_sums(keys, &ordering, &mut slot))
}

fn group_sum_with_arena(
    keys: &[Scalar],
    revenues: &[Scalar],
) -> Result<Vec<(EntityId, f64)>, TypeError> {
    let arena = Bump::new();
    let mut ordering = BumpVec::<ScalarKey<'_>>::new_in(&arena);
    let mut slot = HashMap::<ScalarKey<'_>, (usize, f64)>::new();

    for (pos, (key, value)) in keys.iter().zip(revenues).enumerate() {
        if key.is_missing() {
            continue;
        }
        let key_id = key.key();
        let entry = slot.entry(key_id).or_insert_with(|| {
            ordering.push(key_id);
            (pos, 0.0)
        });
        if value.is_missing() {
            continue;
        }
        entry.1 += value.to_f64()?;
    }

    Ok(emit_group_sums(keys, ordering.as_slice(), &mut slot))
}

/// Reconstruct entity ids from the source keys at output time; the hash
/// keys themselves only ever borrow.
fn emit_group_sums<'a>(
    source_keys: &[Scalar],
    ordering: &[ScalarKey<'a>],
    slot: &mut HashMap<ScalarKey<'a>, (usize, f64)>,
) -> Vec<(EntityId, f64)> {
    let mut out = Vec::with_capacity(ordering.len());
    for key in ordering {
        let (source_pos, sum) = slot
            .remove(key)
            .expect("ordering holds only inserted keys");
        if let Some(id) = EntityId::from_scalar(&source_keys[source_pos]) {
            out.push((id, sum));
        }
    }
    out
}

// ── Aggregate result ───────────────────────────────────────────────────

/// Immutable snapshot of a completed pass. Produced only when every chunk
/// folded cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    total_revenue: f64,
    total_transactions: u64,
    product_revenue: RevenueLedger,
    city_revenue: RevenueLedger,
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
    chunk_count: usize,
}

impl AggregateReport {
    #[must_use]
    pub fn total_revenue(&self) -> f64 {
        self.total_revenue
    }

    #[must_use]
    pub fn total_transactions(&self) -> u64 {
        self.total_transactions
    }

    #[must_use]
    pub fn product_revenue(&self) -> &RevenueLedger {
        &self.product_revenue
    }

    #[must_use]
    pub fn city_revenue(&self) -> &RevenueLedger {
        &self.city_revenue
    }

    #[must_use]
    pub fn min_date(&self) -> Option<NaiveDate> {
        self.min_date
    }

    #[must_use]
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.max_date
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────

/// Clean one raw chunk: drop exact duplicates, fill missing values, then
/// coerce the date column. Order matters; dedup compares the raw cells.
fn clean_chunk(raw: &Frame) -> Frame {
    raw.dedup_rows().fill_missing().parse_dates(DATE_COLUMN)
}

fn resolve_names(ids: &[Scalar], table: &LookupTable) -> Vec<Scalar> {
    ids.iter()
        .map(|cell| match EntityId::from_scalar(cell) {
            Some(id) => Scalar::Utf8(table.resolve(&id)),
            None => Scalar::Null(NullKind::Null),
        })
        .collect()
}

/// Attach resolved display-name columns for whichever id columns exist.
fn enrich_chunk(chunk: &Frame, lookups: &SalesLookups) -> Result<Frame, FrameError> {
    let mut out = chunk.clone();
    if let Some(ids) = chunk.column(PRODUCT_ID_COLUMN) {
        out = out.with_column(
            PRODUCT_LOOKUP.display_column,
            resolve_names(ids, &lookups.products),
        )?;
    }
    if let Some(ids) = chunk.column(STORE_ID_COLUMN) {
        out = out.with_column(CITY_LOOKUP.display_column, resolve_names(ids, &lookups.cities))?;
    }
    Ok(out)
}

/// Run the whole pass over an already-open chunk stream. See
/// [`aggregate_sales_path`] for the file-based entry point.
pub fn aggregate_chunks<I>(
    chunks: I,
    lookups: &SalesLookups,
    options: AggregationOptions,
    observer: &mut dyn ProgressObserver,
) -> Result<(AggregateReport, Sample), AggregateError>
where
    I: IntoIterator<Item = Result<Frame, IoError>>,
{
    let mut total_revenue = 0.0_f64;
    let mut total_transactions = 0_u64;
    let mut product_revenue = RevenueLedger::new();
    let mut city_revenue = RevenueLedger::new();
    let mut min_date: Option<NaiveDate> = None;
    let mut max_date: Option<NaiveDate> = None;
    let mut chunk_count = 0_usize;
    let mut collector = SampleCollector::new(options.sample_chunk_budget, options.sample_row_cap);

    for (pos, next) in chunks.into_iter().enumerate() {
        let chunk_index = pos + 1;
        let fold = |source: ProcessingError| AggregateError::Processing {
            chunk_index,
            source,
        };

        let raw = next.map_err(|err| fold(err.into()))?;
        let raw_rows = raw.n_rows();
        let cleaned = clean_chunk(&raw);
        let rows = cleaned.n_rows();

        if let Some(dates) = cleaned.column(DATE_COLUMN) {
            for value in dates {
                if let Some(date) = value.as_date() {
                    min_date = Some(min_date.map_or(date, |current| current.min(date)));
                    max_date = Some(max_date.map_or(date, |current| current.max(date)));
                }
            }
        }

        if let Some(revenues) = cleaned.column(REVENUE_COLUMN) {
            total_revenue += strict_sum(revenues).map_err(|err| fold(err.into()))?;
        }

        // Every surviving row is a transaction, revenue column or not.
        total_transactions += rows as u64;

        if let Some(revenues) = cleaned.column(REVENUE_COLUMN) {
            if let Some(keys) = cleaned.column(PRODUCT_ID_COLUMN) {
                let sums = group_revenue_by_key(keys, revenues, options.exec)
                    .map_err(|err| fold(err.into()))?;
                for (id, amount) in sums {
                    product_revenue.add(lookups.products.resolve(&id), amount);
                }
            }
            if let Some(keys) = cleaned.column(STORE_ID_COLUMN) {
                let sums = group_revenue_by_key(keys, revenues, options.exec)
                    .map_err(|err| fold(err.into()))?;
                for (id, amount) in sums {
                    city_revenue.add(lookups.cities.resolve(&id), amount);
                }
            }
        }

        if collector.wants_more() {
            let enriched = enrich_chunk(&cleaned, lookups).map_err(|err| fold(err.into()))?;
            collector.offer(enriched);
        }

        chunk_count = chunk_index;
        debug!(
            chunk_index,
            raw_rows,
            rows,
            deduped = raw_rows - rows,
            "folded sales chunk"
        );
        observer.observe(ProgressEvent::ChunkProcessed {
            chunk_index,
            rows,
            fraction: progress_fraction(chunk_index),
        });
    }

    if chunk_count == 0 {
        return Err(AggregateError::EmptyDataset);
    }

    observer.observe(ProgressEvent::Completed {
        chunks: chunk_count,
        transactions: total_transactions,
        fraction: 1.0,
    });
    info!(
        chunks = chunk_count,
        transactions = total_transactions,
        revenue = total_revenue,
        "sales aggregation complete"
    );

    let sample = collector.finalize()?;
    let report = AggregateReport {
        total_revenue,
        total_transactions,
        product_revenue,
        city_revenue,
        min_date,
        max_date,
        chunk_count,
    };
    Ok((report, sample))
}

/// Open the sales CSV and fold it chunk by chunk. Fails up front when the
/// file is absent, after the pass when it held no rows at all.
pub fn aggregate_sales_path(
    sales_path: impl AsRef<Path>,
    lookups: &SalesLookups,
    options: AggregationOptions,
    observer: &mut dyn ProgressObserver,
) -> Result<(AggregateReport, Sample), AggregateError> {
    let reader = ChunkedCsvReader::from_path(sales_path, options.chunk_size)?;
    aggregate_chunks(reader, lookups, options, observer)
}

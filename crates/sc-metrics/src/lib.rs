#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use sc_aggregate::{AggregateReport, RevenueLedger};
use sc_frame::Frame;
use sc_types::{nancount, nanmax, nanmean, nanmedian, nanmin, nanstd, relaxed_dtype, DType, Scalar};
use serde::{Deserialize, Serialize};

const DATE_COLUMN: &str = "date";
const REVENUE_COLUMN: &str = "revenue";

// ── Headline metrics ───────────────────────────────────────────────────

/// Revenue per transaction. Zero when there were no transactions, so the
/// quotient never faults.
#[must_use]
pub fn average_ticket(report: &AggregateReport) -> f64 {
    if report.total_transactions() == 0 {
        return 0.0;
    }
    report.total_revenue() / report.total_transactions() as f64
}

/// The highest-revenue product, or `None` when no product revenue was
/// collected. Ties go to the product seen first during the load, which
/// keeps the answer stable across repeated runs on the same input.
#[must_use]
pub fn top_product(report: &AggregateReport) -> Option<&str> {
    let mut entries = report.product_revenue().iter();
    let (mut best_name, mut best_revenue) = entries.next()?;
    for (name, revenue) in entries {
        if revenue > best_revenue {
            best_name = name;
            best_revenue = revenue;
        }
    }
    Some(best_name)
}

fn ranked(ledger: &RevenueLedger) -> Vec<(&str, f64)> {
    let mut out: Vec<(&str, f64)> = ledger.iter().collect();
    // Stable sort, so equal revenues keep first-seen order.
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    out
}

/// The `n` highest-revenue products, descending.
#[must_use]
pub fn top_products(report: &AggregateReport, n: usize) -> Vec<(&str, f64)> {
    let mut out = ranked(report.product_revenue());
    out.truncate(n);
    out
}

/// Every city, highest revenue first.
#[must_use]
pub fn cities_by_revenue(report: &AggregateReport) -> Vec<(&str, f64)> {
    ranked(report.city_revenue())
}

// ── Sample views ───────────────────────────────────────────────────────

/// Keep sample rows whose date falls inside the inclusive range. Rows
/// without a parsed date are dropped. `None` means the sample has no date
/// column at all, which callers report as "unavailable" rather than an
/// error. Only the sample is ever filtered; the full dataset is not
/// re-scanned, so filtered views are sample-accurate.
#[must_use]
pub fn filter_by_date_range(frame: &Frame, start: NaiveDate, end: NaiveDate) -> Option<Frame> {
    let dates = frame.column(DATE_COLUMN)?;
    let mask: Vec<bool> = dates
        .iter()
        .map(|cell| cell.as_date().is_some_and(|date| start <= date && date <= end))
        .collect();
    let filtered = frame
        .filter_rows(&mask)
        .expect("mask length matches the frame");
    Some(filtered)
}

/// Revenue summed per calendar day over the sample, ascending by date.
/// Rows without a parsed date are skipped; rows with a date but no usable
/// revenue still register the day at zero. `None` when the sample lacks a
/// date or revenue column.
#[must_use]
pub fn daily_revenue(frame: &Frame) -> Option<Vec<(NaiveDate, f64)>> {
    let dates = frame.column(DATE_COLUMN)?;
    let revenues = frame.column(REVENUE_COLUMN)?;

    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (cell, value) in dates.iter().zip(revenues) {
        if let Some(date) = cell.as_date() {
            let slot = per_day.entry(date).or_insert(0.0);
            if !value.is_missing() {
                *slot += value.to_f64().unwrap_or(0.0);
            }
        }
    }
    Some(per_day.into_iter().collect())
}

/// Descriptive statistics for one numeric sample column. Statistics other
/// than the count are `None` when the column held no usable numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub column: String,
    pub count: u64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

fn stat(value: Scalar) -> Option<f64> {
    match value {
        Scalar::Float64(v) => Some(v),
        _ => None,
    }
}

// Linear interpolation between the two nearest order statistics.
fn percentile_linear(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Count, mean, sample standard deviation, min, quartiles, and max for
/// each numeric column of the sample, in column order. Text, bool, and
/// date columns are skipped.
#[must_use]
pub fn numeric_summaries(frame: &Frame) -> Vec<ColumnSummary> {
    let mut out = Vec::new();
    for name in frame.column_names() {
        let Some(values) = frame.column(name) else {
            continue;
        };
        if !matches!(relaxed_dtype(values), DType::Int64 | DType::Float64) {
            continue;
        }
        let count = match nancount(values) {
            Scalar::Int64(n) => n as u64,
            _ => 0,
        };
        let mut nums: Vec<f64> = values
            .iter()
            .filter(|v| !v.is_missing())
            .filter_map(|v| v.to_f64().ok())
            .collect();
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let quartile = |q: f64| {
            if nums.is_empty() {
                None
            } else {
                Some(percentile_linear(&nums, q))
            }
        };
        out.push(ColumnSummary {
            column: name.clone(),
            count,
            mean: stat(nanmean(values)),
            std: stat(nanstd(values, 1)),
            min: stat(nanmin(values)),
            q25: quartile(0.25),
            median: stat(nanmedian(values)),
            q75: quartile(0.75),
            max: stat(nanmax(values)),
        });
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sc_aggregate::{aggregate_chunks, AggregateReport, AggregationOptions, NoProgress};
    use sc_frame::Frame;
    use sc_lookup::{LookupTable, SalesLookups};
    use sc_types::{NullKind, Scalar};

    use super::{
        average_ticket, cities_by_revenue, daily_revenue, filter_by_date_range, numeric_summaries,
        top_product, top_products,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn int_column(values: &[i64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::Int64).collect()
    }

    fn float_column(values: &[f64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::Float64).collect()
    }

    /// Run the pipeline over one in-memory chunk and keep only the report.
    fn report_for(frame: Frame) -> AggregateReport {
        let lookups = SalesLookups::from_tables(
            LookupTable::from_entries(Vec::new(), "Product"),
            LookupTable::from_entries(Vec::new(), "Store"),
        );
        let (report, _) = aggregate_chunks(
            vec![Ok(frame)],
            &lookups,
            AggregationOptions::default(),
            &mut NoProgress,
        )
        .expect("pipeline works");
        report
    }

    fn sales_frame(product_ids: &[i64], revenues: &[f64]) -> Frame {
        Frame::new(vec![
            (
                "order_id".to_owned(),
                int_column(&(0..product_ids.len() as i64).collect::<Vec<_>>()),
            ),
            ("product_id".to_owned(), int_column(product_ids)),
            ("store_id".to_owned(), int_column(product_ids)),
            ("revenue".to_owned(), float_column(revenues)),
        ])
        .expect("frame builds")
    }

    // ── Headline metrics ───────────────────────────────────────────────

    #[test]
    fn average_ticket_divides_revenue_by_transactions() {
        let report = report_for(sales_frame(&[1, 2, 3, 4], &[10.0, 20.0, 30.0, 40.0]));
        assert!((average_ticket(&report) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn average_ticket_is_zero_without_transactions() {
        let empty: AggregateReport = serde_json::from_str(
            r#"{
                "total_revenue": 0.0,
                "total_transactions": 0,
                "product_revenue": [],
                "city_revenue": [],
                "min_date": null,
                "max_date": null,
                "chunk_count": 0
            }"#,
        )
        .expect("report deserializes");
        assert_eq!(average_ticket(&empty), 0.0);
    }

    #[test]
    fn top_product_takes_the_largest_bucket() {
        let report = report_for(sales_frame(&[1, 2, 2, 3], &[5.0, 4.0, 4.0, 1.0]));
        assert_eq!(top_product(&report), Some("Product 2"));
    }

    #[test]
    fn top_product_tie_goes_to_first_seen() {
        let report = report_for(sales_frame(&[7, 8], &[5.0, 5.0]));
        assert_eq!(top_product(&report), Some("Product 7"));
    }

    #[test]
    fn top_product_is_absent_without_product_data() {
        let frame = Frame::new(vec![("revenue".to_owned(), float_column(&[1.0, 2.0]))])
            .expect("frame builds");
        let report = report_for(frame);
        assert_eq!(top_product(&report), None);
    }

    #[test]
    fn top_products_sorts_descending_and_truncates() {
        let report = report_for(sales_frame(&[1, 2, 3, 2], &[1.0, 3.0, 2.0, 3.0]));
        let top = top_products(&report, 2);
        assert_eq!(top, vec![("Product 2", 6.0), ("Product 3", 2.0)]);
    }

    #[test]
    fn city_ranking_keeps_first_seen_order_for_ties() {
        let report = report_for(sales_frame(&[5, 4, 6], &[2.0, 2.0, 9.0]));
        let ranking = cities_by_revenue(&report);
        assert_eq!(
            ranking,
            vec![("Store 6", 9.0), ("Store 5", 2.0), ("Store 4", 2.0)]
        );
    }

    // ── Sample views ───────────────────────────────────────────────────

    fn dated_sample() -> Frame {
        Frame::new(vec![
            (
                "date".to_owned(),
                vec![
                    Scalar::Date(date(2024, 5, 1)),
                    Scalar::Date(date(2024, 5, 2)),
                    Scalar::Null(NullKind::NaT),
                    Scalar::Date(date(2024, 5, 4)),
                ],
            ),
            ("revenue".to_owned(), float_column(&[10.0, 20.0, 30.0, 40.0])),
        ])
        .expect("frame builds")
    }

    #[test]
    fn date_filter_is_inclusive_and_drops_undated_rows() {
        let filtered = filter_by_date_range(&dated_sample(), date(2024, 5, 2), date(2024, 5, 4))
            .expect("date column present");
        assert_eq!(filtered.n_rows(), 2);
        assert_eq!(
            filtered.column("revenue"),
            Some(&[Scalar::Float64(20.0), Scalar::Float64(40.0)][..])
        );
    }

    #[test]
    fn date_filter_is_unavailable_without_a_date_column() {
        let frame = Frame::new(vec![("revenue".to_owned(), float_column(&[1.0]))])
            .expect("frame builds");
        assert!(filter_by_date_range(&frame, date(2024, 1, 1), date(2024, 12, 31)).is_none());
    }

    #[test]
    fn daily_revenue_sums_per_day_ascending() {
        let frame = Frame::new(vec![
            (
                "date".to_owned(),
                vec![
                    Scalar::Date(date(2024, 5, 2)),
                    Scalar::Date(date(2024, 5, 1)),
                    Scalar::Date(date(2024, 5, 2)),
                    Scalar::Null(NullKind::NaT),
                ],
            ),
            ("revenue".to_owned(), float_column(&[5.0, 1.0, 7.0, 99.0])),
        ])
        .expect("frame builds");

        let daily = daily_revenue(&frame).expect("columns present");
        assert_eq!(daily, vec![(date(2024, 5, 1), 1.0), (date(2024, 5, 2), 12.0)]);
    }

    #[test]
    fn daily_revenue_registers_days_with_missing_revenue_at_zero() {
        let frame = Frame::new(vec![
            ("date".to_owned(), vec![Scalar::Date(date(2024, 5, 3))]),
            ("revenue".to_owned(), vec![Scalar::Null(NullKind::NaN)]),
        ])
        .expect("frame builds");

        let daily = daily_revenue(&frame).expect("columns present");
        assert_eq!(daily, vec![(date(2024, 5, 3), 0.0)]);
    }

    #[test]
    fn daily_revenue_is_unavailable_without_both_columns() {
        let undated = Frame::new(vec![("revenue".to_owned(), float_column(&[1.0]))])
            .expect("frame builds");
        assert!(daily_revenue(&undated).is_none());

        let unpriced = Frame::new(vec![(
            "date".to_owned(),
            vec![Scalar::Date(date(2024, 5, 1))],
        )])
        .expect("frame builds");
        assert!(daily_revenue(&unpriced).is_none());
    }

    #[test]
    fn numeric_summaries_cover_numeric_columns_only() {
        let frame = Frame::new(vec![
            ("quantity".to_owned(), int_column(&[1, 2, 3, 4])),
            (
                "label".to_owned(),
                vec![Scalar::Utf8("a".to_owned()); 4],
            ),
            (
                "revenue".to_owned(),
                vec![
                    Scalar::Float64(2.0),
                    Scalar::Float64(4.0),
                    Scalar::Null(NullKind::NaN),
                    Scalar::Float64(6.0),
                ],
            ),
        ])
        .expect("frame builds");

        let summaries = numeric_summaries(&frame);
        assert_eq!(summaries.len(), 2);

        assert_eq!(summaries[0].column, "quantity");
        assert_eq!(summaries[0].count, 4);
        assert_eq!(summaries[0].mean, Some(2.5));
        assert_eq!(summaries[0].min, Some(1.0));
        // Even count: both outer quartiles interpolate between neighbours.
        assert_eq!(summaries[0].q25, Some(1.75));
        assert_eq!(summaries[0].median, Some(2.5));
        assert_eq!(summaries[0].q75, Some(3.25));
        assert_eq!(summaries[0].max, Some(4.0));

        assert_eq!(summaries[1].column, "revenue");
        assert_eq!(summaries[1].count, 3);
        assert_eq!(summaries[1].mean, Some(4.0));
        assert_eq!(summaries[1].std, Some(2.0));
        // Odd count after the missing value drops: median is exact, the
        // quartiles interpolate halfway.
        assert_eq!(summaries[1].q25, Some(3.0));
        assert_eq!(summaries[1].median, Some(4.0));
        assert_eq!(summaries[1].q75, Some(5.0));
    }

    #[test]
    fn numeric_summaries_handle_an_all_missing_numeric_mix() {
        let frame = Frame::new(vec![(
            "revenue".to_owned(),
            vec![Scalar::Null(NullKind::NaN), Scalar::Float64(3.0)],
        )])
        .expect("frame builds");

        let summaries = numeric_summaries(&frame);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[0].mean, Some(3.0));
        // One observation leaves the sample deviation undefined; every
        // quartile collapses onto that observation.
        assert_eq!(summaries[0].std, None);
        assert_eq!(summaries[0].q25, Some(3.0));
        assert_eq!(summaries[0].median, Some(3.0));
        assert_eq!(summaries[0].q75, Some(3.0));
    }

    #[test]
    fn quartiles_sort_before_interpolating() {
        let frame = Frame::new(vec![(
            "revenue".to_owned(),
            float_column(&[40.0, 10.0, 30.0, 20.0]),
        )])
        .expect("frame builds");

        let summaries = numeric_summaries(&frame);
        assert_eq!(summaries[0].q25, Some(17.5));
        assert_eq!(summaries[0].median, Some(25.0));
        assert_eq!(summaries[0].q75, Some(32.5));
    }
}

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sc_aggregate::AggregateReport;
use sc_frame::Frame;
use sc_io::write_csv_string;
use sc_metrics::{
    average_ticket, cities_by_revenue, daily_revenue, numeric_summaries, top_product, top_products,
    ColumnSummary,
};
use sc_sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOP_PRODUCT_FALLBACK: &str = "N/A";
pub const DEFAULT_TOP_COUNT: usize = 10;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] sc_io::IoError),
}

// ── Summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRevenueEntry {
    pub date: NaiveDate,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSynopsis {
    pub rows: usize,
    pub source_chunks: usize,
    pub truncated: bool,
    pub columns: Vec<String>,
}

/// Everything the presentation side needs in one serializable block. The
/// headline figures come from the full-dataset aggregates; daily revenue
/// and the column statistics are sample-accurate only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_revenue: f64,
    pub total_transactions: u64,
    pub average_ticket: f64,
    pub top_product: String,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub chunk_count: usize,
    pub top_products: Vec<RankedEntry>,
    pub city_revenue: Vec<RankedEntry>,
    pub daily_revenue: Option<Vec<DailyRevenueEntry>>,
    pub numeric_summaries: Vec<ColumnSummary>,
    pub sample: SampleSynopsis,
}

fn ranked_entries(pairs: Vec<(&str, f64)>) -> Vec<RankedEntry> {
    pairs
        .into_iter()
        .map(|(name, revenue)| RankedEntry {
            name: name.to_owned(),
            revenue,
        })
        .collect()
}

/// Assemble the summary from a finished pass. `top_count` bounds the
/// product ranking; the city ranking is always complete.
#[must_use]
pub fn build_summary(report: &AggregateReport, sample: &Sample, top_count: usize) -> ReportSummary {
    ReportSummary {
        total_revenue: report.total_revenue(),
        total_transactions: report.total_transactions(),
        average_ticket: average_ticket(report),
        top_product: top_product(report).unwrap_or(TOP_PRODUCT_FALLBACK).to_owned(),
        min_date: report.min_date(),
        max_date: report.max_date(),
        chunk_count: report.chunk_count(),
        top_products: ranked_entries(top_products(report, top_count)),
        city_revenue: ranked_entries(cities_by_revenue(report)),
        daily_revenue: daily_revenue(sample.frame()).map(|days| {
            days.into_iter()
                .map(|(date, revenue)| DailyRevenueEntry { date, revenue })
                .collect()
        }),
        numeric_summaries: numeric_summaries(sample.frame()),
        sample: SampleSynopsis {
            rows: sample.n_rows(),
            source_chunks: sample.source_chunks(),
            truncated: sample.truncated(),
            columns: sample.frame().column_names().to_vec(),
        },
    }
}

fn date_text(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| "missing".to_owned(), |d| d.to_string())
}

fn stat_text(value: Option<f64>) -> String {
    value.map_or_else(|| "missing".to_owned(), |v| format!("{v:.2}"))
}

impl ReportSummary {
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "SalesReport transactions={} revenue={:.2} average_ticket={:.2} top_product={} chunks={} dates[min={},max={}]\n",
            self.total_transactions,
            self.total_revenue,
            self.average_ticket,
            self.top_product,
            self.chunk_count,
            date_text(self.min_date),
            date_text(self.max_date),
        ));
        for entry in &self.top_products {
            out.push_str(&format!("- product {} revenue={:.2}\n", entry.name, entry.revenue));
        }
        for entry in &self.city_revenue {
            out.push_str(&format!("- city {} revenue={:.2}\n", entry.name, entry.revenue));
        }
        match &self.daily_revenue {
            Some(days) => out.push_str(&format!("daily_revenue days={}\n", days.len())),
            None => out.push_str("daily_revenue=unavailable\n"),
        }
        out.push_str(&format!(
            "sample rows={} source_chunks={} truncated={} columns={}\n",
            self.sample.rows,
            self.sample.source_chunks,
            self.sample.truncated,
            self.sample.columns.len(),
        ));
        for summary in &self.numeric_summaries {
            out.push_str(&format!(
                "- column {} count={} mean={} std={} min={} q25={} median={} q75={} max={}\n",
                summary.column,
                summary.count,
                stat_text(summary.mean),
                stat_text(summary.std),
                stat_text(summary.min),
                stat_text(summary.q25),
                stat_text(summary.median),
                stat_text(summary.q75),
                stat_text(summary.max),
            ));
        }
        out
    }
}

// ── Artifacts ──────────────────────────────────────────────────────────

pub fn write_report_json(
    path: impl AsRef<Path>,
    summary: &ReportSummary,
) -> Result<PathBuf, ReportError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(summary)?)?;
    Ok(path)
}

pub fn write_sample_csv(path: impl AsRef<Path>, frame: &Frame) -> Result<PathBuf, ReportError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, write_csv_string(frame)?)?;
    Ok(path)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use sc_aggregate::{aggregate_chunks, AggregationOptions, NoProgress};
    use sc_frame::Frame;
    use sc_lookup::{EntityId, LookupTable, SalesLookups};
    use sc_sample::Sample;
    use sc_types::Scalar;

    use super::{build_summary, write_report_json, write_sample_csv, ReportSummary};

    fn lookups() -> SalesLookups {
        SalesLookups::from_tables(
            LookupTable::from_entries(
                vec![(EntityId::Int64(1), "Espresso".to_owned())],
                "Product",
            ),
            LookupTable::from_entries(vec![(EntityId::Int64(9), "Lyon".to_owned())], "Store"),
        )
    }

    fn run(csv_rows: Vec<(i64, i64, i64, f64, &str)>) -> (sc_aggregate::AggregateReport, Sample) {
        let n = csv_rows.len();
        let mut order = Vec::with_capacity(n);
        let mut products = Vec::with_capacity(n);
        let mut stores = Vec::with_capacity(n);
        let mut revenues = Vec::with_capacity(n);
        let mut dates = Vec::with_capacity(n);
        for (order_id, product_id, store_id, revenue, date) in csv_rows {
            order.push(Scalar::Int64(order_id));
            products.push(Scalar::Int64(product_id));
            stores.push(Scalar::Int64(store_id));
            revenues.push(Scalar::Float64(revenue));
            dates.push(Scalar::Utf8(date.to_owned()));
        }
        let frame = Frame::new(vec![
            ("order_id".to_owned(), order),
            ("product_id".to_owned(), products),
            ("store_id".to_owned(), stores),
            ("revenue".to_owned(), revenues),
            ("date".to_owned(), dates),
        ])
        .expect("frame builds");

        aggregate_chunks(
            vec![Ok(frame)],
            &lookups(),
            AggregationOptions::default(),
            &mut NoProgress,
        )
        .expect("pipeline works")
    }

    fn summary() -> ReportSummary {
        let (report, sample) = run(vec![
            (0, 1, 9, 10.0, "2024-05-01"),
            (1, 1, 9, 20.0, "2024-05-01"),
            (2, 2, 8, 5.0, "2024-05-03"),
        ]);
        build_summary(&report, &sample, 10)
    }

    #[test]
    fn summary_collects_kpis_and_rankings() {
        let summary = summary();

        assert_eq!(summary.total_transactions, 3);
        assert!((summary.total_revenue - 35.0).abs() < 1e-9);
        assert!((summary.average_ticket - 35.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.top_product, "Espresso");
        assert_eq!(summary.chunk_count, 1);

        assert_eq!(summary.top_products.len(), 2);
        assert_eq!(summary.top_products[0].name, "Espresso");
        assert_eq!(summary.top_products[0].revenue, 30.0);
        assert_eq!(summary.city_revenue[0].name, "Lyon");

        let daily = summary.daily_revenue.as_ref().expect("dates present");
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].revenue, 30.0);

        assert_eq!(summary.sample.rows, 3);
        assert!(!summary.sample.truncated);
        assert!(summary.sample.columns.contains(&"product_name".to_owned()));
    }

    #[test]
    fn summary_falls_back_when_no_product_revenue_exists() {
        let frame = Frame::new(vec![(
            "revenue".to_owned(),
            vec![Scalar::Float64(1.0), Scalar::Float64(2.0)],
        )])
        .expect("frame builds");
        let (report, sample) = aggregate_chunks(
            vec![Ok(frame)],
            &lookups(),
            AggregationOptions::default(),
            &mut NoProgress,
        )
        .expect("pipeline works");

        let summary = build_summary(&report, &sample, 10);
        assert_eq!(summary.top_product, "N/A");
        assert!(summary.top_products.is_empty());
        assert!(summary.daily_revenue.is_none());
    }

    #[test]
    fn plain_rendering_leads_with_the_headline() {
        let text = summary().render_plain();
        let mut lines = text.lines();
        let headline = lines.next().expect("headline");
        assert!(headline.starts_with("SalesReport transactions=3 revenue=35.00"));
        assert!(headline.contains("dates[min=2024-05-01,max=2024-05-03]"));
        assert!(text.contains("- product Espresso revenue=30.00\n"));
        assert!(text.contains("- city Lyon revenue=30.00\n"));
        assert!(text.contains("daily_revenue days=2\n"));
        assert!(text.contains("sample rows=3 source_chunks=1 truncated=false"));
        assert!(text.contains(
            "- column revenue count=3 mean=11.67 std=7.64 min=5.00 q25=7.50 median=10.00 q75=15.00 max=20.00\n"
        ));
    }

    #[test]
    fn json_artifact_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary = summary();

        let path = write_report_json(dir.path().join("out/report.json"), &summary)
            .expect("artifact writes");
        let raw = std::fs::read_to_string(path).expect("artifact reads");
        let parsed: ReportSummary = serde_json::from_str(&raw).expect("artifact parses");
        assert_eq!(parsed, summary);
    }

    #[test]
    fn sample_csv_keeps_the_enriched_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_, sample) = run(vec![(0, 1, 9, 10.0, "2024-05-01")]);

        let path = write_sample_csv(dir.path().join("sample.csv"), sample.frame())
            .expect("artifact writes");
        let raw = std::fs::read_to_string(path).expect("artifact reads");
        let header = raw.lines().next().expect("header row");
        assert_eq!(header, "order_id,product_id,store_id,revenue,date,product_name,city");
        assert!(raw.contains("Espresso"));
    }
}

#![forbid(unsafe_code)]

use std::path::PathBuf;

use sc_aggregate::{
    aggregate_sales_path, AggregateError, AggregationOptions, ProgressEvent, ProgressObserver,
};
use sc_lookup::SalesLookups;
use sc_report::{build_summary, write_report_json, write_sample_csv, DEFAULT_TOP_COUNT};

/// Mirrors the load status line a dashboard would show, one line per chunk.
struct StderrProgress;

impl ProgressObserver for StderrProgress {
    fn observe(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::ChunkProcessed {
                chunk_index,
                rows,
                fraction,
            } => {
                eprintln!(
                    "processing chunk {chunk_index} ({rows} rows) [{:.0}%]",
                    fraction * 100.0
                );
            }
            ProgressEvent::Completed {
                chunks,
                transactions,
                ..
            } => {
                eprintln!("loaded {transactions} transactions from {chunks} chunks");
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut sales = PathBuf::from("sales.csv");
    let mut products = PathBuf::from("product_hierarchy.csv");
    let mut cities = PathBuf::from("store_cities.csv");
    let mut options = AggregationOptions::default();
    let mut top_count = DEFAULT_TOP_COUNT;
    let mut json_path: Option<PathBuf> = None;
    let mut sample_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sales" => {
                sales = PathBuf::from(args.next().ok_or("--sales requires a path")?);
            }
            "--products" => {
                products = PathBuf::from(args.next().ok_or("--products requires a path")?);
            }
            "--cities" => {
                cities = PathBuf::from(args.next().ok_or("--cities requires a path")?);
            }
            "--chunk-size" => {
                options.chunk_size = args
                    .next()
                    .ok_or("--chunk-size requires a row count")?
                    .parse()?;
            }
            "--sample-chunks" => {
                options.sample_chunk_budget = args
                    .next()
                    .ok_or("--sample-chunks requires a chunk count")?
                    .parse()?;
            }
            "--sample-rows" => {
                options.sample_row_cap = args
                    .next()
                    .ok_or("--sample-rows requires a row count")?
                    .parse()?;
            }
            "--top" => {
                top_count = args
                    .next()
                    .ok_or("--top requires a product count")?
                    .parse()?;
            }
            "--no-arena" => {
                options.exec.use_arena = false;
            }
            "--json" => {
                json_path = Some(PathBuf::from(args.next().ok_or("--json requires a path")?));
            }
            "--write-sample" => {
                sample_path = Some(PathBuf::from(
                    args.next().ok_or("--write-sample requires a path")?,
                ));
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let lookups = SalesLookups::load(&products, &cities)?;
    let (report, sample) = match aggregate_sales_path(&sales, &lookups, options, &mut StderrProgress)
    {
        Ok(result) => result,
        Err(AggregateError::EmptyDataset) => {
            return Err(format!("no data found in {}", sales.display()).into());
        }
        Err(err) => return Err(err.into()),
    };

    let summary = build_summary(&report, &sample, top_count);
    print!("{}", summary.render_plain());

    if let Some(path) = json_path {
        let written = write_report_json(&path, &summary)?;
        println!("wrote report_json={}", written.display());
    }
    if let Some(path) = sample_path {
        let written = write_sample_csv(&path, sample.frame())?;
        println!("wrote sample_csv={}", written.display());
    }

    Ok(())
}

fn print_help() {
    println!(
        "sc-report-cli\n\
         Usage:\n\
         \tsc-report-cli [--sales sales.csv] [--products product_hierarchy.csv] [--cities store_cities.csv]\n\
         Options:\n\
         \t--sales <path>         Sales dataset CSV (default sales.csv)\n\
         \t--products <path>      Product lookup CSV (default product_hierarchy.csv)\n\
         \t--cities <path>        Store city lookup CSV (default store_cities.csv)\n\
         \t--chunk-size <rows>    Rows per chunk (default 100000)\n\
         \t--sample-chunks <n>    Chunks retained for the sample (default 3)\n\
         \t--sample-rows <rows>   Row cap on the finalized sample (default 50000)\n\
         \t--top <n>              Products shown in the ranking (default 10)\n\
         \t--no-arena             Group chunk revenue through the global allocator\n\
         \t--json <path>          Write the summary as pretty JSON\n\
         \t--write-sample <path>  Write the enriched sample as CSV\n\
         \t-h, --help             Show this help"
    );
}

// Entry point and high-level CLI flow.
//
// A single run loads the dispatch export and the municipality boundaries,
// writes the report, maps and tables into the output directory, and prints
// Markdown previews of the main tables to the console.
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biofuel_report::config::{Args, ReportConfig};
use biofuel_report::output::preview_table;
use biofuel_report::util::{format_int, format_number};
use biofuel_report::REPORT_FILE;

/// Initialize tracing from `BIOFUEL_LOG`, defaulting to `info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("BIOFUEL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ReportConfig::from_args(Args::parse()).context("invalid arguments")?;

    let outcome = biofuel_report::run(&config).context("report generation failed")?;

    let load = &outcome.load;
    println!(
        "Processing dataset... ({} rows read, {} dispatches kept)",
        format_int(load.total_rows as u64),
        format_int(load.accepted_rows as u64)
    );
    if load.rejected_rows > 0 {
        println!(
            "Note: {} rows skipped due to parse/validation errors.",
            format_int(load.rejected_rows as u64)
        );
    }
    if load.unresolved_codes > 0 {
        println!(
            "Note: {} dispatches have a municipality code that cannot be mapped.",
            format_int(load.unresolved_codes as u64)
        );
    }
    if load.outlier_volumes > 0 {
        println!(
            "Info: {} volumes above the plausibility threshold treated as missing.",
            format_int(load.outlier_volumes as u64)
        );
    }

    let n = config.preview_rows;
    preview_table(1, "Dispatches by product", None, &outcome.product_counts, n);
    preview_table(2, "Dispatches by year", None, &outcome.yearly, n);
    preview_table(3, "Dispatched volume by year", Some("volumes in gallons"), &outcome.yearly_volume, n);
    preview_table(4, "Buyer type", None, &outcome.buyer_types, n);
    preview_table(5, "Provider municipalities", None, &outcome.origins, n);
    preview_table(6, "Destination municipalities", None, &outcome.destinations, n);
    preview_table(
        7,
        "Provider-destination pairs",
        Some("dispatch count per pair"),
        &outcome.pairs,
        n,
    );

    let s = &outcome.summary;
    println!("Summary Stats (summary.json):");
    println!(
        "{{\"total_dispatches\": {}, \"b100_volume\": {}, \"ethanol_volume\": {}, \"connections_drawn\": {}}}\n",
        format_int(s.total_dispatches as u64),
        format_number(s.b100_volume, 2),
        format_number(s.ethanol_volume, 2),
        format_int(s.connections_drawn as u64)
    );
    println!(
        "Report written to {} ({} files)",
        config.out_dir.join(REPORT_FILE).display(),
        outcome.files.len()
    );
    Ok(())
}

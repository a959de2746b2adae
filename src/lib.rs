//! B100 and ethanol dispatch report.
//!
//! One synchronous batch: load the SICOM dispatch export and municipality
//! boundaries, aggregate, join against geometry, render charts and maps, and
//! write a single static report plus the aggregate tables.
pub mod charts;
pub mod config;
pub mod error;
pub mod geo_join;
pub mod loader;
pub mod maps;
pub mod output;
pub mod presenter;
pub mod reports;
pub mod types;
pub mod util;

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::charts::{BarGroup, BoxStats, LineSeries};
use crate::config::ReportConfig;
use crate::error::Result;
use crate::geo_join::GeoIndex;
use crate::loader::LoadReport;
use crate::presenter::ReportView;
use crate::types::{
    BuyerTypeRow, DispatchRecord, FanOutRow, MunicipalitySummaryRow, PairCountRow, Product,
    ProductCountRow, SummaryStats, YearlyDispatchRow, YearlyVolumeRow,
};

pub const REPORT_FILE: &str = "report.html";
pub const MUNICIPALITY_MAP_FILE: &str = "municipality_map.html";
pub const DISPATCH_MAP_FILE: &str = "dispatch_map.html";
pub const SUMMARY_FILE: &str = "summary.json";

/// Everything a run computed, for console previews and tests.
#[derive(Debug)]
pub struct ReportOutcome {
    pub load: LoadReport,
    pub summary: SummaryStats,
    pub product_counts: Vec<ProductCountRow>,
    pub yearly: Vec<YearlyDispatchRow>,
    pub yearly_volume: Vec<YearlyVolumeRow>,
    pub buyer_types: Vec<BuyerTypeRow>,
    pub origins: Vec<MunicipalitySummaryRow>,
    pub destinations: Vec<MunicipalitySummaryRow>,
    pub pairs: Vec<PairCountRow>,
    pub origin_fan_out: Vec<FanOutRow>,
    pub destination_fan_out: Vec<FanOutRow>,
    pub files: Vec<PathBuf>,
}

/// Run the whole pipeline. Both inputs are read before anything is written,
/// so a read failure leaves no partial report behind.
pub fn run(config: &ReportConfig) -> Result<ReportOutcome> {
    let (records, load) = loader::load_dispatches(&config.dispatches)?;
    let geometries = loader::load_municipalities(&config.municipalities)?;

    let product_counts = reports::count_by_product(&records);
    let yearly = reports::dispatches_by_year(&records);
    let yearly_volume = reports::volume_by_year(&records);
    let buyer_types = reports::buyer_type_shares(&records);
    let origins = reports::summarize_origins(&records);
    let destinations = reports::summarize_destinations(&records);
    let pairs = reports::pair_counts(&records);
    let origin_fan_out = reports::origin_fan_out(&pairs);
    let destination_fan_out = reports::destination_fan_out(&pairs);
    info!(
        pairs = pairs.len(),
        origins = origins.len(),
        destinations = destinations.len(),
        "aggregated dispatch records"
    );

    let index = GeoIndex::build(geometries);
    let layers = geo_join::municipality_layers(&records, &index);
    let markers = geo_join::centroid_markers(&layers);
    let connections = geo_join::connections(&pairs, &index);
    info!(
        geometries = index.len(),
        connections = connections.lines.len(),
        skipped = connections.skipped,
        "joined municipality geometry"
    );

    let summary = reports::generate_summary(&records, &load, &pairs, &layers, &connections);

    let monthly_charts: Vec<String> = Product::ALL
        .iter()
        .map(|p| {
            let series: Vec<LineSeries> =
                charts::monthly_series(&reports::monthly_dispatches(&records, *p));
            charts::line_chart_svg(&format!("Monthly {} dispatches by year", p), &series)
        })
        .collect();
    let volume_boxes = volume_box_plots(&records);
    let years: Vec<String> = yearly_volume.iter().map(|r| r.year.to_string()).collect();
    let volume_groups: Vec<BarGroup> = Product::ALL
        .iter()
        .map(|p| BarGroup {
            name: p.label().to_string(),
            color: p.color(),
            values: yearly_volume.iter().map(|r| r.volume(*p)).collect(),
        })
        .collect();
    let yearly_volume_chart = charts::grouped_bar_svg(
        "Dispatched volume by year",
        "Dispatched volume (gal)",
        &years,
        &volume_groups,
    );
    let origin_fan_out_chart = charts::bar_chart_svg(
        "Relationships per provider municipality",
        "Destinations",
        &fan_out_bars(&origin_fan_out),
        Product::B100.color(),
    );
    let destination_fan_out_chart = charts::bar_chart_svg(
        "Relationships per destination municipality",
        "Providers",
        &fan_out_bars(&destination_fan_out),
        Product::B100.color(),
    );

    let municipality_map = maps::municipality_map_html(&layers)?;
    let connection_map = maps::connection_map_html(&markers, &connections)?;

    let report = presenter::render_report(&ReportView {
        summary: &summary,
        product_counts: &product_counts,
        yearly: &yearly,
        monthly_charts: &monthly_charts,
        volume_boxes: &volume_boxes,
        yearly_volume_chart: &yearly_volume_chart,
        buyer_types: &buyer_types,
        origins: &origins,
        destinations: &destinations,
        municipality_map: &municipality_map,
        origin_fan_out: &origin_fan_out,
        destination_fan_out: &destination_fan_out,
        origin_fan_out_chart: &origin_fan_out_chart,
        destination_fan_out_chart: &destination_fan_out_chart,
        connection_map: &connection_map,
    });

    fs::create_dir_all(&config.out_dir)?;
    let out = |name: &str| config.out_dir.join(name);
    let mut files = Vec::new();

    let path = out(MUNICIPALITY_MAP_FILE);
    output::write_text(&path, &municipality_map)?;
    files.push(path);
    let path = out(DISPATCH_MAP_FILE);
    output::write_text(&path, &connection_map)?;
    files.push(path);
    let path = out(REPORT_FILE);
    output::write_text(&path, &report)?;
    files.push(path);

    macro_rules! export {
        ($name:expr, $rows:expr) => {{
            let path = out($name);
            output::write_csv(&path, $rows)?;
            files.push(path);
        }};
    }
    export!("product_counts.csv", &product_counts);
    export!("yearly_dispatches.csv", &yearly);
    export!("yearly_volume.csv", &yearly_volume);
    export!("buyer_types.csv", &buyer_types);
    export!("origin_municipalities.csv", &origins);
    export!("destination_municipalities.csv", &destinations);
    export!("dispatch_pairs.csv", &pairs);
    export!("origin_fan_out.csv", &origin_fan_out);
    export!("destination_fan_out.csv", &destination_fan_out);

    let path = out(SUMMARY_FILE);
    output::write_json(&path, &summary)?;
    files.push(path);

    info!(out_dir = %config.out_dir.display(), files = files.len(), "report generated");

    Ok(ReportOutcome {
        load,
        summary,
        product_counts,
        yearly,
        yearly_volume,
        buyer_types,
        origins,
        destinations,
        pairs,
        origin_fan_out,
        destination_fan_out,
        files,
    })
}

/// One box plot per product, each drawn from that product's own volumes.
fn volume_box_plots(records: &[DispatchRecord]) -> Vec<String> {
    Product::ALL
        .iter()
        .map(|p| {
            let stats = BoxStats::from_values(&reports::volumes_for(records, *p));
            charts::box_plot_svg(
                &format!("Distribution of dispatched {} volumes", p),
                p.label(),
                stats.as_ref(),
                p.color(),
            )
        })
        .collect()
}

fn fan_out_bars(rows: &[FanOutRow]) -> Vec<(String, f64)> {
    rows.iter()
        .map(|r| (r.municipality.clone(), r.relations as f64))
        .collect()
}

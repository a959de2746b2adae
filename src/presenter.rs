//! Single-page report assembly.
//!
//! Sections are emitted in a fixed order: dispatch counts, volumes, buyer
//! types, geography, relationships. Tables reuse the `Tabled` headers and
//! cell formatting of the console previews.
use std::fmt::Write as FmtWrite;

use tabled::Tabled;

use crate::reports::{busiest, widest_fan_out};
use crate::types::{
    BuyerTypeRow, FanOutRow, MunicipalitySummaryRow, ProductCountRow, SummaryStats,
    YearlyDispatchRow, VOLUME_OUTLIER_THRESHOLD,
};
use crate::util::{escape_html, format_int, format_number};

const TITLE: &str = "Ethanol and B100 producers in Colombia";

pub struct ReportView<'a> {
    pub summary: &'a SummaryStats,
    pub product_counts: &'a [ProductCountRow],
    pub yearly: &'a [YearlyDispatchRow],
    pub monthly_charts: &'a [String],
    pub volume_boxes: &'a [String],
    pub yearly_volume_chart: &'a str,
    pub buyer_types: &'a [BuyerTypeRow],
    pub origins: &'a [MunicipalitySummaryRow],
    pub destinations: &'a [MunicipalitySummaryRow],
    pub municipality_map: &'a str,
    pub origin_fan_out: &'a [FanOutRow],
    pub destination_fan_out: &'a [FanOutRow],
    pub origin_fan_out_chart: &'a str,
    pub destination_fan_out_chart: &'a str,
    pub connection_map: &'a str,
}

/// HTML table built from a `Tabled` row type.
pub fn html_table<T: Tabled>(rows: &[T], max_height_px: u32) -> String {
    let mut out = format!(
        "<div class=\"table-wrap\" style=\"max-height:{}px\">\n<table>\n<thead><tr>",
        max_height_px
    );
    for h in T::headers() {
        let _ = write!(out, "<th>{}</th>", escape_html(&h));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in rows {
        out.push_str("<tr>");
        for cell in row.fields() {
            let _ = write!(out, "<td>{}</td>", escape_html(&cell));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n</div>\n");
    out
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>\n", escape_html(text))
}

fn embedded_map(doc: &str) -> String {
    format!(
        "<iframe srcdoc=\"{}\" width=\"100%\" height=\"600\" style=\"border:0\"></iframe>\n",
        escape_html(doc)
    )
}

fn figures(svgs: &[String]) -> String {
    svgs.iter()
        .map(|svg| format!("<figure>\n{}\n</figure>\n", svg))
        .collect()
}

fn intro_text(s: &SummaryStats) -> String {
    let span = match (s.first_year, s.last_year) {
        (Some(a), Some(b)) if a != b => format!(" between {} and {}", a, b),
        (Some(a), _) => format!(" in {}", a),
        _ => String::new(),
    };
    format!(
        "The data come from SICOM records of B100 and ethanol producers in Colombia: {} dispatches{}. \
         Each dispatch carries its date, buyer type, provider and destination department and municipality, \
         product and dispatched volume.",
        format_int(s.total_dispatches as u64),
        span
    )
}

fn yearly_text(yearly: &[YearlyDispatchRow], products: &[ProductCountRow]) -> String {
    let mut parts = Vec::new();
    if let (Some(max), Some(min)) = (
        yearly.iter().max_by_key(|r| (r.total, -r.year)),
        yearly.iter().min_by_key(|r| (r.total, r.year)),
    ) {
        parts.push(format!(
            "{} has the most dispatches ({}) and {} the fewest ({}).",
            max.year,
            format_int(max.total),
            min.year,
            format_int(min.total)
        ));
    }
    let per_product: Vec<String> = products
        .iter()
        .map(|p| format!("{} {}", p.product, format_int(p.dispatches)))
        .collect();
    if !per_product.is_empty() {
        parts.push(format!("Dispatches by product: {}.", per_product.join(", ")));
    }
    parts.join(" ")
}

fn volume_text(s: &SummaryStats) -> String {
    format!(
        "Dispatched volume totals {} gallons of B100 and {} gallons of ethanol. \
         {} dispatches have no usable volume (missing, or above the {} gallon plausibility threshold) \
         and are left out of the volume figures.",
        format_number(s.b100_volume, 2),
        format_number(s.ethanol_volume, 2),
        format_int(s.missing_volumes as u64),
        format_int(VOLUME_OUTLIER_THRESHOLD as u64)
    )
}

fn place_text(role: &str, rows: &[MunicipalitySummaryRow]) -> String {
    let departments: std::collections::BTreeSet<&str> =
        rows.iter().map(|r| r.department.as_str()).collect();
    let mut text = format!(
        "{} {} municipalities in {} departments.",
        format_int(rows.len() as u64),
        role,
        format_int(departments.len() as u64)
    );
    if let Some(top) = busiest(rows) {
        let _ = write!(
            text,
            " {} ({}) leads with {} dispatches.",
            top.municipality,
            top.department,
            format_int(top.dispatches)
        );
    }
    text
}

fn fan_out_text(rows: &[FanOutRow], verb: &str, counterpart: &str) -> String {
    match widest_fan_out(rows) {
        Some(top) => format!(
            "{} {} the most municipalities: {} {}.",
            top.municipality,
            verb,
            top.relations,
            counterpart
        ),
        None => "No relationships recorded.".to_string(),
    }
}

fn geometry_text(s: &SummaryStats) -> Option<String> {
    let unmatched = s.unmatched_origin_geometries + s.unmatched_destination_geometries;
    let dropped = s.connections_skipped + s.connections_unmapped;
    if unmatched == 0 && dropped == 0 {
        return None;
    }
    Some(format!(
        "{} municipality codes have no boundary geometry and are not drawn; {} of {} connections could not be placed on the map.",
        format_int(unmatched as u64),
        format_int(dropped as u64),
        format_int(s.dispatch_pairs as u64)
    ))
}

pub fn render_report(view: &ReportView<'_>) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape_html(TITLE));
    body.push_str(&paragraph(
        "Pure biodiesel (B100) and bioethanol are products derived from processing plant material.",
    ));
    body.push_str(&paragraph(&intro_text(view.summary)));

    body.push_str("<h2>Dispatches by product</h2>\n");
    body.push_str("<h3>Table: total dispatches by product</h3>\n");
    body.push_str(&html_table(view.product_counts, 120));
    body.push_str("<h3>Table: total dispatches by year</h3>\n");
    body.push_str(&html_table(view.yearly, 220));
    body.push_str(&paragraph(&yearly_text(view.yearly, view.product_counts)));
    body.push_str("<h3>Chart: monthly dispatches by year</h3>\n");
    body.push_str(&figures(view.monthly_charts));

    body.push_str("<h2>Dispatched volumes</h2>\n");
    body.push_str("<h3>Chart: volume distribution</h3>\n");
    body.push_str(&figures(view.volume_boxes));
    body.push_str(&paragraph(&volume_text(view.summary)));
    body.push_str(&figures(&[view.yearly_volume_chart.to_string()]));

    body.push_str("<h2>Buyer type</h2>\n");
    body.push_str(&html_table(view.buyer_types, 220));

    body.push_str("<h2>Dispatch locations</h2>\n");
    body.push_str("<h3>Table: provider municipalities</h3>\n");
    body.push_str(&html_table(view.origins, 320));
    body.push_str(&paragraph(&place_text("provider", view.origins)));
    body.push_str("<h3>Table: destination municipalities</h3>\n");
    body.push_str(&html_table(view.destinations, 320));
    body.push_str(&paragraph(&place_text("destination", view.destinations)));
    body.push_str("<h3>Map: provider and destination municipalities</h3>\n");
    body.push_str(&embedded_map(view.municipality_map));
    if let Some(text) = geometry_text(view.summary) {
        body.push_str(&paragraph(&text));
    }

    body.push_str("<h2>Provider-destination relationships</h2>\n");
    body.push_str(&figures(&[view.origin_fan_out_chart.to_string()]));
    body.push_str(&paragraph(&fan_out_text(
        view.origin_fan_out,
        "ships to",
        "destinations",
    )));
    body.push_str(&figures(&[view.destination_fan_out_chart.to_string()]));
    body.push_str(&paragraph(&fan_out_text(
        view.destination_fan_out,
        "receives from",
        "providers",
    )));
    body.push_str("<h3>Map: dispatches between municipalities</h3>\n");
    body.push_str(&embedded_map(view.connection_map));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 1000px; margin: 0 auto; padding: 20px; color: #374151; }}
h1 {{ color: #57B4BA; text-align: center; font-size: 30px; }}
h2 {{ color: #A0C878; text-align: center; font-size: 24px; }}
.table-wrap {{ overflow-y: auto; margin-bottom: 12px; }}
table {{ border-collapse: collapse; width: 100%; }}
th {{ background: #A0C878; color: white; font-weight: bold; position: sticky; top: 0; }}
th, td {{ text-align: center; padding: 8px; border-bottom: 1px solid #e5e7eb; }}
figure {{ margin: 16px 0; }}
</style>
</head>
<body>
{body}<footer><small>Generated {generated}</small></footer>
</body>
</html>
"#,
        title = escape_html(TITLE),
        body = body,
        generated = view.summary.generated_at.format("%Y-%m-%d %H:%M"),
    )
}

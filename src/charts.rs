// SVG chart generation for the report page.
//
// Every chart is a self-contained `<svg>` string; hover text uses native
// `<title>` elements so the page needs no script for tooltips.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Month;

use crate::types::MonthlyPoint;
use crate::util::{average, escape_html, format_int, format_number, quantile_sorted, std_dev};

const WIDTH: f64 = 760.0;
const HEIGHT: f64 = 340.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 140.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;
const TITLE_COLOR: &str = "#A0C878";
const AXIS_COLOR: &str = "#9ca3af";
const TEXT_COLOR: &str = "#374151";

const YEAR_PALETTE: [&str; 8] = [
    "#57B4BA", "#FE4F2D", "#A0C878", "#015551", "#FDA403", "#7A73D1", "#B4505A", "#6b7280",
];

pub struct LineSeries {
    pub name: String,
    pub color: &'static str,
    /// (month, dispatches), months 1..=12.
    pub points: Vec<(u32, u64)>,
}

/// Split monthly points into one series per year.
pub fn monthly_series(points: &[MonthlyPoint]) -> Vec<LineSeries> {
    let mut by_year: BTreeMap<i32, Vec<(u32, u64)>> = BTreeMap::new();
    for p in points {
        by_year.entry(p.year).or_default().push((p.month, p.dispatches));
    }
    by_year
        .into_iter()
        .enumerate()
        .map(|(i, (year, mut pts))| {
            pts.sort_by_key(|(m, _)| *m);
            LineSeries {
                name: year.to_string(),
                color: YEAR_PALETTE[i % YEAR_PALETTE.len()],
                points: pts,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub outliers: Vec<f64>,
}

impl BoxStats {
    /// Five-number summary with 1.5 IQR whiskers. `None` for an empty input.
    pub fn from_values(values: &[f64]) -> Option<BoxStats> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let q1 = quantile_sorted(&sorted, 0.25);
        let median = quantile_sorted(&sorted, 0.5);
        let q3 = quantile_sorted(&sorted, 0.75);
        let iqr = q3 - q1;
        let (lo_fence, hi_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
        let inside: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v >= lo_fence && *v <= hi_fence)
            .collect();
        let outliers = sorted
            .iter()
            .copied()
            .filter(|v| *v < lo_fence || *v > hi_fence)
            .collect();
        Some(BoxStats {
            count: sorted.len(),
            min: sorted[0],
            q1,
            median,
            q3,
            max: sorted[sorted.len() - 1],
            lower_whisker: inside.first().copied().unwrap_or(q1),
            upper_whisker: inside.last().copied().unwrap_or(q3),
            mean: average(&sorted),
            std_dev: std_dev(&sorted),
            outliers,
        })
    }
}

pub struct BarGroup {
    pub name: String,
    pub color: &'static str,
    pub values: Vec<f64>,
}

fn svg_open(title: &str, height: f64) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="100%" style="max-width:{w}px;background:white;border-radius:8px">
  <text x="{cx}" y="28" text-anchor="middle" font-size="16" font-weight="600" fill="{color}">{title}</text>
"##,
        w = WIDTH,
        h = height,
        cx = WIDTH / 2.0,
        color = TITLE_COLOR,
        title = escape_html(title),
    )
}

fn empty_chart(title: &str) -> String {
    let mut svg = svg_open(title, 120.0);
    svg.push_str(&format!(
        r##"  <text x="{}" y="75" text-anchor="middle" font-size="13" fill="{}">No data</text>
</svg>"##,
        WIDTH / 2.0,
        AXIS_COLOR
    ));
    svg
}

/// Round an axis maximum up to 1, 2 or 5 times a power of ten.
fn nice_ceiling(max: f64) -> f64 {
    if !max.is_finite() || max <= 0.0 {
        return 1.0;
    }
    let magnitude = 10f64.powf(max.log10().floor());
    for step in [1.0, 2.0, 5.0, 10.0] {
        if max <= step * magnitude {
            return step * magnitude;
        }
    }
    10.0 * magnitude
}

fn y_axis(max: f64, label: &str) -> String {
    let chart_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let mut out = String::new();
    for i in 0..=4 {
        let v = max * i as f64 / 4.0;
        let y = MARGIN_TOP + chart_h - chart_h * i as f64 / 4.0;
        out.push_str(&format!(
            r##"  <line x1="{x1}" y1="{y:.1}" x2="{x2}" y2="{y:.1}" stroke="#e5e7eb"/>
  <text x="{tx}" y="{ty:.1}" text-anchor="end" font-size="11" fill="{c}">{v}</text>
"##,
            x1 = MARGIN_LEFT,
            x2 = WIDTH - MARGIN_RIGHT,
            tx = MARGIN_LEFT - 8.0,
            ty = y + 4.0,
            c = AXIS_COLOR,
            v = format_number(v, 0),
        ));
    }
    out.push_str(&format!(
        r##"  <text x="18" y="{cy}" text-anchor="middle" font-size="12" fill="{c}" transform="rotate(-90, 18, {cy})">{label}</text>
"##,
        cy = MARGIN_TOP + chart_h / 2.0,
        c = TEXT_COLOR,
        label = escape_html(label),
    ));
    out
}

fn legend(entries: &[(&str, &str)]) -> String {
    let x = WIDTH - MARGIN_RIGHT + 20.0;
    let mut out = String::new();
    for (i, (name, color)) in entries.iter().enumerate() {
        let y = MARGIN_TOP + 10.0 + i as f64 * 20.0;
        out.push_str(&format!(
            r##"  <rect x="{x}" y="{ry}" width="12" height="12" fill="{color}"/>
  <text x="{tx}" y="{ty}" font-size="12" fill="{c}">{name}</text>
"##,
            ry = y - 10.0,
            tx = x + 18.0,
            ty = y,
            c = TEXT_COLOR,
            name = escape_html(name),
        ));
    }
    out
}

/// Monthly dispatch counts, one line per year, months on the x axis.
pub fn line_chart_svg(title: &str, series: &[LineSeries]) -> String {
    if series.iter().all(|s| s.points.is_empty()) {
        return empty_chart(title);
    }
    let chart_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let chart_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let max = nice_ceiling(
        series
            .iter()
            .flat_map(|s| s.points.iter().map(|(_, c)| *c as f64))
            .fold(0.0, f64::max),
    );
    let x_of = |month: u32| MARGIN_LEFT + chart_w * (month.clamp(1, 12) - 1) as f64 / 11.0;
    let y_of = |count: u64| MARGIN_TOP + chart_h - chart_h * count as f64 / max;

    let mut svg = svg_open(title, HEIGHT);
    svg.push_str(&y_axis(max, "Dispatches"));
    for month in 1..=12u32 {
        let name = Month::try_from(month as u8)
            .map(|m| m.name()[..3].to_string())
            .unwrap_or_else(|_| month.to_string());
        svg.push_str(&format!(
            r##"  <text x="{:.1}" y="{}" text-anchor="middle" font-size="11" fill="{}">{}</text>
"##,
            x_of(month),
            HEIGHT - MARGIN_BOTTOM + 18.0,
            AXIS_COLOR,
            name
        ));
    }
    svg.push_str(&format!(
        r##"  <text x="{}" y="{}" text-anchor="middle" font-size="12" fill="{}">Month</text>
"##,
        MARGIN_LEFT + chart_w / 2.0,
        HEIGHT - 12.0,
        TEXT_COLOR
    ));

    for s in series {
        let path: Vec<String> = s
            .points
            .iter()
            .map(|(m, c)| format!("{:.1},{:.1}", x_of(*m), y_of(*c)))
            .collect();
        svg.push_str(&format!(
            r##"  <polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>
"##,
            path.join(" "),
            s.color
        ));
        for (m, c) in &s.points {
            svg.push_str(&format!(
                r##"  <circle cx="{:.1}" cy="{:.1}" r="3.5" fill="{}"><title>{} / {}: {} dispatches</title></circle>
"##,
                x_of(*m),
                y_of(*c),
                s.color,
                escape_html(&s.name),
                m,
                format_int(*c)
            ));
        }
    }
    let entries: Vec<(&str, &str)> = series.iter().map(|s| (s.name.as_str(), s.color)).collect();
    svg.push_str(&legend(&entries));
    svg.push_str("</svg>");
    svg
}

/// Horizontal box plot of one product's volume distribution. The mean is
/// drawn dashed with a one-standard-deviation band around it.
pub fn box_plot_svg(title: &str, label: &str, stats: Option<&BoxStats>, color: &str) -> String {
    let Some(stats) = stats else {
        return empty_chart(title);
    };
    let height = 220.0;
    let chart_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let lo = stats.min.min(stats.mean - stats.std_dev).min(0.0);
    let hi = nice_ceiling(stats.max.max(stats.mean + stats.std_dev));
    let span = if (hi - lo).abs() < f64::EPSILON { 1.0 } else { hi - lo };
    let x_of = |v: f64| MARGIN_LEFT + chart_w * (v - lo) / span;
    let mid = 110.0;
    let half = 28.0;

    let mut svg = svg_open(title, height);
    for i in 0..=4 {
        let v = lo + span * i as f64 / 4.0;
        svg.push_str(&format!(
            r##"  <line x1="{x:.1}" y1="{y1}" x2="{x:.1}" y2="{y2}" stroke="#e5e7eb"/>
  <text x="{x:.1}" y="{ty}" text-anchor="middle" font-size="11" fill="{c}">{v}</text>
"##,
            x = x_of(v),
            y1 = mid - 50.0,
            y2 = mid + 50.0,
            ty = mid + 68.0,
            c = AXIS_COLOR,
            v = format_number(v, 0),
        ));
    }
    svg.push_str(&format!(
        r##"  <text x="{}" y="{}" text-anchor="middle" font-size="12" fill="{}">Dispatched volume (gal)</text>
  <text x="{}" y="{}" text-anchor="end" font-size="12" fill="{}">{}</text>
"##,
        MARGIN_LEFT + chart_w / 2.0,
        height - 12.0,
        TEXT_COLOR,
        MARGIN_LEFT - 8.0,
        mid + 4.0,
        TEXT_COLOR,
        escape_html(label)
    ));
    svg.push_str(&format!(
        r##"  <line x1="{:.1}" y1="{mid}" x2="{:.1}" y2="{mid}" stroke="{color}" stroke-width="1.5"/>
  <line x1="{:.1}" y1="{mid}" x2="{:.1}" y2="{mid}" stroke="{color}" stroke-width="1.5"/>
  <line x1="{lw:.1}" y1="{t}" x2="{lw:.1}" y2="{b}" stroke="{color}" stroke-width="1.5"/>
  <line x1="{uw:.1}" y1="{t}" x2="{uw:.1}" y2="{b}" stroke="{color}" stroke-width="1.5"/>
"##,
        x_of(stats.lower_whisker),
        x_of(stats.q1),
        x_of(stats.q3),
        x_of(stats.upper_whisker),
        lw = x_of(stats.lower_whisker),
        uw = x_of(stats.upper_whisker),
        t = mid - half / 2.0,
        b = mid + half / 2.0,
    ));
    svg.push_str(&format!(
        r##"  <rect x="{:.1}" y="{}" width="{:.1}" height="{}" fill="{color}" fill-opacity="0.35" stroke="{color}" stroke-width="1.5"><title>n={} q1={} median={} q3={}</title></rect>
  <line x1="{md:.1}" y1="{}" x2="{md:.1}" y2="{}" stroke="{color}" stroke-width="2.5"/>
  <line x1="{mn:.1}" y1="{}" x2="{mn:.1}" y2="{}" stroke="{color}" stroke-width="1.5" stroke-dasharray="4,3"><title>mean={} sd={}</title></line>
  <polygon points="{sl:.1},{mid} {mn:.1},{dt} {sh:.1},{mid} {mn:.1},{db}" fill="none" stroke="{color}" stroke-dasharray="4,3"/>
"##,
        x_of(stats.q1),
        mid - half,
        (x_of(stats.q3) - x_of(stats.q1)).max(1.0),
        half * 2.0,
        format_int(stats.count as u64),
        format_number(stats.q1, 2),
        format_number(stats.median, 2),
        format_number(stats.q3, 2),
        mid - half,
        mid + half,
        mid - half,
        mid + half,
        format_number(stats.mean, 2),
        format_number(stats.std_dev, 2),
        md = x_of(stats.median),
        mn = x_of(stats.mean),
        sl = x_of(stats.mean - stats.std_dev),
        sh = x_of(stats.mean + stats.std_dev),
        dt = mid - half * 0.6,
        db = mid + half * 0.6,
    ));
    for v in &stats.outliers {
        svg.push_str(&format!(
            r##"  <circle cx="{:.1}" cy="{mid}" r="2.5" fill="none" stroke="{color}"><title>{}</title></circle>
"##,
            x_of(*v),
            format_number(*v, 2)
        ));
    }
    svg.push_str("</svg>");
    svg
}

/// Side-by-side bars per category, one bar per group.
pub fn grouped_bar_svg(title: &str, y_label: &str, categories: &[String], groups: &[BarGroup]) -> String {
    if categories.is_empty() || groups.is_empty() {
        return empty_chart(title);
    }
    let chart_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let chart_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let max = nice_ceiling(
        groups
            .iter()
            .flat_map(|g| g.values.iter().copied())
            .fold(0.0, f64::max),
    );
    let slot = chart_w / categories.len() as f64;
    let bar_w = slot * 0.8 / groups.len() as f64;

    let mut svg = svg_open(title, HEIGHT);
    svg.push_str(&y_axis(max, y_label));
    for (ci, cat) in categories.iter().enumerate() {
        let x0 = MARGIN_LEFT + slot * ci as f64 + slot * 0.1;
        for (gi, g) in groups.iter().enumerate() {
            let v = g.values.get(ci).copied().unwrap_or(0.0).max(0.0);
            let h = chart_h * v / max;
            svg.push_str(&format!(
                r##"  <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{} {}: {}</title></rect>
"##,
                x0 + bar_w * gi as f64,
                MARGIN_TOP + chart_h - h,
                bar_w,
                h,
                g.color,
                escape_html(cat),
                escape_html(&g.name),
                format_number(v, 2)
            ));
        }
        svg.push_str(&format!(
            r##"  <text x="{:.1}" y="{}" text-anchor="middle" font-size="11" fill="{}">{}</text>
"##,
            x0 + slot * 0.4,
            HEIGHT - MARGIN_BOTTOM + 18.0,
            AXIS_COLOR,
            escape_html(cat)
        ));
    }
    let entries: Vec<(&str, &str)> = groups.iter().map(|g| (g.name.as_str(), g.color)).collect();
    svg.push_str(&legend(&entries));
    svg.push_str("</svg>");
    svg
}

/// Single-series bar chart with rotated category labels.
pub fn bar_chart_svg(title: &str, y_label: &str, bars: &[(String, f64)], color: &str) -> String {
    if bars.is_empty() {
        return empty_chart(title);
    }
    let height = HEIGHT + 80.0;
    let bottom = MARGIN_BOTTOM + 80.0;
    let chart_w = WIDTH - MARGIN_LEFT - 40.0;
    let chart_h = height - MARGIN_TOP - bottom;
    let max = nice_ceiling(bars.iter().map(|(_, v)| *v).fold(0.0, f64::max));
    let slot = chart_w / bars.len() as f64;

    let mut svg = svg_open(title, height);
    for i in 0..=4 {
        let v = max * i as f64 / 4.0;
        let y = MARGIN_TOP + chart_h - chart_h * i as f64 / 4.0;
        svg.push_str(&format!(
            r##"  <line x1="{}" y1="{y:.1}" x2="{}" y2="{y:.1}" stroke="#e5e7eb"/>
  <text x="{}" y="{:.1}" text-anchor="end" font-size="11" fill="{}">{}</text>
"##,
            MARGIN_LEFT,
            WIDTH - 40.0,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            AXIS_COLOR,
            format_number(v, 0)
        ));
    }
    svg.push_str(&format!(
        r##"  <text x="18" y="{cy}" text-anchor="middle" font-size="12" fill="{c}" transform="rotate(-90, 18, {cy})">{label}</text>
"##,
        cy = MARGIN_TOP + chart_h / 2.0,
        c = TEXT_COLOR,
        label = escape_html(y_label),
    ));
    for (i, (name, v)) in bars.iter().enumerate() {
        let h = chart_h * v.max(0.0) / max;
        let x = MARGIN_LEFT + slot * i as f64 + slot * 0.1;
        let lx = x + slot * 0.4;
        let ly = MARGIN_TOP + chart_h + 12.0;
        svg.push_str(&format!(
            r##"  <rect x="{x:.1}" y="{:.1}" width="{:.1}" height="{h:.1}" fill="{color}"><title>{name}: {}</title></rect>
  <text x="{lx:.1}" y="{ly:.1}" text-anchor="end" font-size="10" fill="{c}" transform="rotate(-45, {lx:.1}, {ly:.1})">{name}</text>
"##,
            MARGIN_TOP + chart_h - h,
            slot * 0.8,
            format_number(*v, 0),
            c = AXIS_COLOR,
            name = escape_html(name),
        ));
    }
    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_stats_for_simple_sample() {
        let stats = BoxStats::from_values(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.q3, 4.0);
        assert_eq!(stats.outliers, vec![100.0]);
        assert_eq!(stats.upper_whisker, 4.0);
        assert_eq!(stats.lower_whisker, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.mean - 22.0).abs() < 1e-12);
    }

    #[test]
    fn box_stats_empty_is_none() {
        assert!(BoxStats::from_values(&[]).is_none());
        assert!(BoxStats::from_values(&[f64::NAN]).is_none());
    }

    #[test]
    fn nice_ceiling_rounds_up() {
        assert_eq!(nice_ceiling(0.0), 1.0);
        assert_eq!(nice_ceiling(7.0), 10.0);
        assert_eq!(nice_ceiling(13.0), 20.0);
        assert_eq!(nice_ceiling(420.0), 500.0);
        assert_eq!(nice_ceiling(1000.0), 1000.0);
    }

    #[test]
    fn monthly_series_one_per_year() {
        let points = [
            MonthlyPoint { year: 2022, month: 3, dispatches: 4 },
            MonthlyPoint { year: 2021, month: 5, dispatches: 2 },
            MonthlyPoint { year: 2021, month: 1, dispatches: 1 },
        ];
        let series = monthly_series(&points);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "2021");
        assert_eq!(series[0].points, vec![(1, 1), (5, 2)]);
        assert_ne!(series[0].color, series[1].color);
    }

    #[test]
    fn line_chart_has_series_and_month_labels() {
        let series = monthly_series(&[MonthlyPoint { year: 2021, month: 2, dispatches: 9 }]);
        let svg = line_chart_svg("B100 <monthly>", &series);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains(">Feb<"));
        assert!(svg.contains("B100 &lt;monthly&gt;"));
    }

    #[test]
    fn charts_without_data_render_placeholder() {
        assert!(line_chart_svg("x", &[]).contains("No data"));
        assert!(box_plot_svg("x", "B100", None, "#000").contains("No data"));
        assert!(bar_chart_svg("x", "y", &[], "#000").contains("No data"));
        assert!(grouped_bar_svg("x", "y", &[], &[]).contains("No data"));
    }

    #[test]
    fn bar_charts_draw_one_rect_per_value() {
        let bars = vec![("A".to_string(), 3.0), ("B".to_string(), 6.0)];
        let svg = bar_chart_svg("Fan-out", "Destinations", &bars, "#57B4BA");
        assert_eq!(svg.matches("<rect").count(), 2);

        let groups = vec![
            BarGroup { name: "B100".into(), color: "#57B4BA", values: vec![1.0, 2.0] },
            BarGroup { name: "Ethanol".into(), color: "#FE4F2D", values: vec![3.0, 4.0] },
        ];
        let svg = grouped_bar_svg("Volume", "gal", &["2021".into(), "2022".into()], &groups);
        // four bars plus two legend swatches
        assert_eq!(svg.matches("<rect").count(), 6);
    }
}

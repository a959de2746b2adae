//! Standalone Leaflet map documents.
//!
//! Each map is a complete HTML page: the layer data is serialized to JSON
//! and drawn client-side by Leaflet, which provides pan, zoom and tooltips.
use geo::{LineString, MultiPolygon};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::geo_join::{ConnectionSet, MapArea, Marker, MunicipalityLayers, Role};
use crate::util::{escape_html, format_int};

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
/// Geographic center of Colombia.
const MAP_CENTER: [f64; 2] = [4.5709, -74.2973];
const MAP_ZOOM: u8 = 6;
const DEFAULT_LINE_COLOR: &str = "gray";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchBracket {
    Low,
    Moderate,
    High,
    VeryHigh,
}

/// Half-open `[low, high)` dispatch-count ranges, in ascending order.
const BRACKETS: [(u64, u64, DispatchBracket); 4] = [
    (0, 100, DispatchBracket::Low),
    (100, 1_000, DispatchBracket::Moderate),
    (1_000, 10_000, DispatchBracket::High),
    (10_000, 30_000, DispatchBracket::VeryHigh),
];

impl DispatchBracket {
    pub fn for_count(count: u64) -> Option<DispatchBracket> {
        BRACKETS
            .iter()
            .find(|(low, high, _)| (*low..*high).contains(&count))
            .map(|(_, _, bracket)| *bracket)
    }

    pub fn color(self) -> &'static str {
        match self {
            DispatchBracket::Low => "blue",
            DispatchBracket::Moderate => "green",
            DispatchBracket::High => "orange",
            DispatchBracket::VeryHigh => "red",
        }
    }

    pub fn range(self) -> (u64, u64) {
        BRACKETS
            .iter()
            .find(|(_, _, b)| *b == self)
            .map(|(low, high, _)| (*low, *high))
            .unwrap_or((0, 0))
    }
}

/// Line color for a pair with `count` dispatches; gray outside every bracket.
pub fn line_color(count: u64) -> &'static str {
    DispatchBracket::for_count(count)
        .map(DispatchBracket::color)
        .unwrap_or(DEFAULT_LINE_COLOR)
}

pub fn role_color(role: Role) -> &'static str {
    match role {
        Role::Provider => "#57B4BA",
        Role::Destination => "#FE4F2D",
    }
}

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn multipolygon_geojson(shape: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = shape
        .0
        .iter()
        .map(|p| {
            let mut rings = vec![ring_coords(p.exterior())];
            rings.extend(p.interiors().iter().map(ring_coords));
            Value::Array(rings)
        })
        .collect();
    json!({"type": "MultiPolygon", "coordinates": polygons})
}

/// JSON that can be inlined in a `<script>` block.
fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn legend_swatch(color: &str, label: &str) -> String {
    format!(
        r#"<i style="background:{}; width:10px; height:10px; display:inline-block;"></i> {}<br>"#,
        color,
        escape_html(label)
    )
}

fn legend_box(title: &str, rows: &str) -> String {
    format!(
        r#"<div class="legend" style="position: fixed; bottom: 50px; left: 50px; width: 220px; background-color: white; z-index: 9999; padding: 10px; border-radius: 5px; font-size: 14px; opacity: 0.9; box-shadow: 2px 2px 5px rgba(0,0,0,0.3);">
  <b>{}</b><br>
  {}
</div>"#,
        escape_html(title),
        rows
    )
}

fn leaflet_document(title: &str, legend: &str, script: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="{css}">
<script src="{js}"></script>
<style>html, body, #map {{ height: 100%; width: 100%; margin: 0; padding: 0; }}</style>
</head>
<body>
<div id="map"></div>
{legend}
<script>
var map = L.map('map').setView([{lat}, {lon}], {zoom});
L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{
  maxZoom: 18,
  attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
{script}
</script>
</body>
</html>
"#,
        title = escape_html(title),
        css = LEAFLET_CSS,
        js = LEAFLET_JS,
        legend = legend,
        lat = MAP_CENTER[0],
        lon = MAP_CENTER[1],
        zoom = MAP_ZOOM,
        script = script,
    )
}

/// Record label, plus the boundary file's name when it spells it differently.
/// Leaflet renders tooltip strings as HTML, so the text is escaped.
fn area_tooltip(role: Role, area: &MapArea<'_>) -> String {
    let text = match area.geometry.name.as_deref() {
        Some(name) if !name.eq_ignore_ascii_case(&area.label) => {
            format!("{}: {} ({})", role.label(), area.label, name)
        }
        _ => format!("{}: {}", role.label(), area.label),
    };
    escape_html(&text)
}

/// Provider and destination municipalities as colored polygon overlays.
pub fn municipality_map_html(layers: &MunicipalityLayers<'_>) -> Result<String> {
    let providers = layers.providers.iter().map(|a| (a, Role::Provider));
    let destinations = layers.destinations.iter().map(|a| (a, Role::Destination));
    let features: Vec<Value> = providers
        .chain(destinations)
        .map(|(area, role)| {
            json!({
                "type": "Feature",
                "properties": {
                    "code": area.code,
                    "tooltip": area_tooltip(role, area),
                    "color": role_color(role),
                },
                "geometry": multipolygon_geojson(&area.geometry.shape),
            })
        })
        .collect();
    let collection = json!({"type": "FeatureCollection", "features": features});

    let script = format!(
        r#"L.geoJSON({data}, {{
  style: function (f) {{ return {{color: f.properties.color, fillColor: f.properties.color, fillOpacity: 0.5, weight: 1}}; }},
  onEachFeature: function (f, layer) {{ layer.bindTooltip(f.properties.tooltip); }}
}}).addTo(map);"#,
        data = script_json(&collection)?
    );
    let rows = [
        legend_swatch(role_color(Role::Provider), "Provider municipalities"),
        legend_swatch(role_color(Role::Destination), "Destination municipalities"),
    ]
    .join("\n  ");
    Ok(leaflet_document(
        "Provider and destination municipalities",
        &legend_box("Legend", &rows),
        &script,
    ))
}

#[derive(Serialize)]
struct MarkerView {
    lat: f64,
    lon: f64,
    color: &'static str,
    tooltip: String,
}

#[derive(Serialize)]
struct LineView {
    from: [f64; 2],
    to: [f64; 2],
    color: &'static str,
    tooltip: String,
}

/// Centroid markers plus one line per origin-destination pair, colored by
/// dispatch-count bracket.
pub fn connection_map_html(markers: &[Marker], connections: &ConnectionSet) -> Result<String> {
    let marker_views: Vec<MarkerView> = markers
        .iter()
        .map(|m| MarkerView {
            lat: m.lat,
            lon: m.lon,
            color: role_color(m.role),
            tooltip: escape_html(&format!("{}: {}", m.role.label(), m.label)),
        })
        .collect();
    let lines: Vec<LineView> = connections
        .lines
        .iter()
        .map(|c| LineView {
            from: c.from,
            to: c.to,
            color: line_color(c.dispatches),
            tooltip: escape_html(&format!(
                "{} → {}: {} dispatches",
                c.origin,
                c.destination,
                format_int(c.dispatches)
            )),
        })
        .collect();

    let script = format!(
        r#"var markers = {markers};
var lines = {lines};
lines.forEach(function (l) {{
  L.polyline([l.from, l.to], {{color: l.color, weight: 3, opacity: 0.6}}).bindTooltip(l.tooltip).addTo(map);
}});
markers.forEach(function (m) {{
  L.circleMarker([m.lat, m.lon], {{radius: 5, color: m.color, fill: true, fillColor: m.color, fillOpacity: 0.6}}).bindTooltip(m.tooltip).addTo(map);
}});"#,
        markers = script_json(&marker_views)?,
        lines = script_json(&lines)?,
    );

    let mut rows: Vec<String> = BRACKETS
        .iter()
        .map(|(low, high, bracket)| {
            legend_swatch(
                bracket.color(),
                &format!("{} - {}", format_int(*low), format_int(*high)),
            )
        })
        .collect();
    rows.push(legend_swatch(role_color(Role::Provider), "Provider"));
    rows.push(legend_swatch(role_color(Role::Destination), "Destination"));
    Ok(leaflet_document(
        "Dispatches between municipalities",
        &legend_box("Dispatch range", &rows.join("\n  ")),
        &script,
    ))
}

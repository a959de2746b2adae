use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use csv::ReaderBuilder;
use geo::{Centroid, Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ReportError, Result};
use crate::types::{
    apply_volume_threshold, DaneCode, DispatchRecord, MunicipalityGeometry, Place, PlaceCode,
    Product, RawRow,
};
use crate::util::{clean_text, parse_f64_safe, parse_i32_safe};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
    pub outlier_volumes: usize,
    pub missing_volumes: usize,
    /// Accepted rows with a provider or destination code that is not a
    /// valid DANE code. They stay in every table but are never mapped.
    pub unresolved_codes: usize,
}

/// Columns a dispatch export must carry for any row to be usable.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "PRODUCTO",
    "ANIO_DESPACHO",
    "MES_DESPACHO",
    "VOLUMEN_DESPACHADO",
    "CODIGO_MUNICIPIO_DANE_PROVEEDOR",
    "CODIGO_MUNICIPIO_DANE_DESTINO",
];

/// Read the dispatch CSV fully into memory.
///
/// Rows that cannot be turned into a [`DispatchRecord`] are skipped and
/// counted. Failing to read the file, or a header without one of the
/// [`REQUIRED_COLUMNS`], is an error.
pub fn load_dispatches(path: &Path) -> Result<(Vec<DispatchRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = rdr.headers()?;
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h.trim() == *col))
        .collect();
    if !missing.is_empty() {
        return Err(ReportError::InvalidInput(format!(
            "{} is missing required columns: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut report = LoadReport::default();
    let mut records = Vec::new();

    for result in rdr.deserialize::<RawRow>() {
        report.total_rows += 1;
        let line = report.total_rows + 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(line, error = %e, "unreadable dispatch row");
                report.rejected_rows += 1;
                continue;
            }
        };
        let raw_volume = parse_f64_safe(row.volume.as_deref());
        match clean_row(row) {
            Ok(record) => {
                match (raw_volume, record.volume) {
                    (Some(_), None) => report.outlier_volumes += 1,
                    (None, None) => report.missing_volumes += 1,
                    _ => {}
                }
                if record.origin.code.dane().is_none() || record.destination.code.dane().is_none() {
                    report.unresolved_codes += 1;
                }
                records.push(record);
            }
            Err(reason) => {
                debug!(line, reason, "rejected dispatch row");
                report.rejected_rows += 1;
            }
        }
    }

    report.accepted_rows = records.len();
    if report.rejected_rows > 0 {
        warn!(
            rejected = report.rejected_rows,
            total = report.total_rows,
            "skipped dispatch rows that failed validation"
        );
    }
    if report.unresolved_codes > 0 {
        warn!(
            rows = report.unresolved_codes,
            "dispatch rows with an unusable DANE code kept off the maps"
        );
    }
    info!(
        path = %path.display(),
        rows = report.accepted_rows,
        outliers = report.outlier_volumes,
        "loaded dispatch records"
    );
    Ok((records, report))
}

fn clean_row(row: RawRow) -> std::result::Result<DispatchRecord, &'static str> {
    let product = row
        .product
        .as_deref()
        .and_then(Product::from_label)
        .ok_or("unknown product")?;
    let year = parse_i32_safe(row.year.as_deref()).ok_or("invalid year")?;
    let month = match parse_i32_safe(row.month.as_deref()) {
        Some(m) if (1..=12).contains(&m) => m as u32,
        _ => return Err("invalid month"),
    };
    let volume = apply_volume_threshold(parse_f64_safe(row.volume.as_deref()));

    Ok(DispatchRecord {
        product,
        year,
        month,
        volume,
        buyer_type: clean_text(row.buyer_type),
        origin: clean_place(row.origin_department, row.origin_municipality, row.origin_code),
        destination: clean_place(
            row.destination_department,
            row.destination_municipality,
            row.destination_code,
        ),
    })
}

fn clean_place(
    department: Option<String>,
    municipality: Option<String>,
    code: Option<String>,
) -> Place {
    let municipality = clean_text(municipality);
    let code = PlaceCode::from_raw(code.as_deref(), municipality.as_deref().unwrap_or_default());
    let municipality = municipality.unwrap_or_else(|| match code.as_str() {
        "" => "Unknown".to_string(),
        c => c.to_string(),
    });
    Place {
        department: clean_text(department).unwrap_or_else(|| "Unknown".to_string()),
        municipality,
        code,
    }
}

/// Read a municipality GeoJSON `FeatureCollection`.
///
/// Features without a usable code or polygonal geometry are skipped.
pub fn load_municipalities(path: &Path) -> Result<Vec<MunicipalityGeometry>> {
    let file = File::open(path)?;
    let doc: Value = serde_json::from_reader(BufReader::new(file))?;
    let geometries = parse_feature_collection(&doc)?;
    info!(
        path = %path.display(),
        municipalities = geometries.len(),
        "loaded municipality geometries"
    );
    Ok(geometries)
}

pub fn parse_feature_collection(doc: &Value) -> Result<Vec<MunicipalityGeometry>> {
    if doc.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(ReportError::InvalidGeoJson(
            "top-level object is not a FeatureCollection".to_string(),
        ));
    }
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ReportError::InvalidGeoJson("missing features array".to_string()))?;

    let mut out = Vec::with_capacity(features.len());
    let mut skipped = 0usize;
    for (idx, feature) in features.iter().enumerate() {
        let props = feature.get("properties");
        let Some(code) = props.and_then(feature_code) else {
            debug!(feature = idx, "feature without a usable DANE code");
            skipped += 1;
            continue;
        };
        let Some(shape) = feature.get("geometry").and_then(parse_geometry) else {
            debug!(feature = idx, %code, "feature without polygonal geometry");
            skipped += 1;
            continue;
        };
        let name = props
            .and_then(|p| p.get("mpio_cnmbr"))
            .and_then(property_text);
        let centroid = shape.centroid();
        out.push(MunicipalityGeometry {
            code,
            name,
            shape,
            centroid,
        });
    }
    if skipped > 0 {
        warn!(skipped, "skipped municipality features");
    }
    Ok(out)
}

fn feature_code(props: &Value) -> Option<DaneCode> {
    let dpto = props.get("dpto_ccdgo").and_then(property_text);
    let mpio = props.get("mpio_ccdgo").and_then(property_text);
    if let (Some(d), Some(m)) = (dpto, mpio) {
        if let Some(code) = DaneCode::from_parts(&d, &m) {
            return Some(code);
        }
    }
    // Some MGN releases only carry the concatenated code.
    props
        .get("mpio_cdpmp")
        .and_then(property_text)
        .and_then(|c| DaneCode::normalize(&c))
}

fn property_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => clean_text(Some(s.clone())),
        Value::Number(n) => Some(
            n.as_u64()
                .map(|u| u.to_string())
                .unwrap_or_else(|| n.to_string()),
        ),
        _ => None,
    }
}

fn parse_geometry(geometry: &Value) -> Option<MultiPolygon<f64>> {
    let coords = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Polygon" => Some(MultiPolygon::new(vec![parse_polygon(coords)?])),
        "MultiPolygon" => {
            let polygons = coords
                .as_array()?
                .iter()
                .map(parse_polygon)
                .collect::<Option<Vec<_>>>()?;
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polygons))
            }
        }
        _ => None,
    }
}

fn parse_polygon(rings: &Value) -> Option<Polygon<f64>> {
    let mut rings = rings.as_array()?.iter().map(parse_ring);
    let exterior = rings.next()??;
    let interiors = rings.collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

fn parse_ring(ring: &Value) -> Option<LineString<f64>> {
    let coords = ring
        .as_array()?
        .iter()
        .map(|pos| {
            let pos = pos.as_array()?;
            Some(Coord {
                x: pos.first()?.as_f64()?,
                y: pos.get(1)?.as_f64()?,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    if coords.len() < 3 {
        return None;
    }
    Some(LineString::new(coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const HEADER: &str = "PRODUCTO,TIPO_COMPRADOR,DEPARTAMENTO_PROVEEDOR,MUNICIPIO_PROVEEDOR,CODIGO_MUNICIPIO_DANE_PROVEEDOR,DEPARTAMENTO,MUNICIPIO,CODIGO_MUNICIPIO_DANE_DESTINO,ANIO_DESPACHO,MES_DESPACHO,VOLUMEN_DESPACHADO";

    fn write_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for r in rows {
            writeln!(file, "{}", r).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_rows_and_pads_codes() {
        let file = write_csv(&[
            "B 100,DISTRIBUIDOR MAYORISTA,CUNDINAMARCA,FACATATIVA,25269,ANTIOQUIA,MEDELLIN,5001,2021,3,1200.5",
            "ETANOL - ALCOHOL CARBURANTE,,VALLE DEL CAUCA,EL CERRITO,76248,BOGOTA D.C.,BOGOTA D.C.,11001,2022,12,",
        ]);
        let (records, report) = load_dispatches(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(report.accepted_rows, 2);
        assert_eq!(report.missing_volumes, 1);
        assert_eq!(records[0].destination.code.as_str(), "05001");
        assert_eq!(records[0].volume, Some(1200.5));
        assert_eq!(records[1].product, Product::Ethanol);
        assert_eq!(records[1].buyer_type, None);
        for r in &records {
            assert_eq!(r.origin.code.as_str().len(), 5);
            assert_eq!(r.destination.code.as_str().len(), 5);
        }
    }

    #[test]
    fn outlier_volume_becomes_missing() {
        let file = write_csv(&[
            "B 100,X,META,PUERTO GAITAN,50568,META,VILLAVICENCIO,50001,2023,1,3100001",
            "B 100,X,META,PUERTO GAITAN,50568,META,VILLAVICENCIO,50001,2023,1,3100000",
        ]);
        let (records, report) = load_dispatches(file.path()).unwrap();
        assert_eq!(report.outlier_volumes, 1);
        assert_eq!(records[0].volume, None);
        assert_eq!(records[1].volume, Some(3.1e6));
    }

    #[test]
    fn malformed_rows_are_counted_not_fatal() {
        let file = write_csv(&[
            "DIESEL,X,META,A,50568,META,B,50001,2023,1,10",
            "B 100,X,META,A,50568,META,B,50001,2023,13,10",
            "B 100,X,META,A,50568,META,B,50001,2023,1,10",
        ]);
        let (records, report) = load_dispatches(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.rejected_rows, 2);
    }

    #[test]
    fn unusable_codes_keep_the_row() {
        let file = write_csv(&[
            "B 100,X,META,PUERTO GAITAN,,META,VILLAVICENCIO,50001,2023,1,10",
            "B 100,X,META,PUERTO GAITAN,50568,META,,ABCDE,2023,1,20",
            "B 100,X,META,PUERTO GAITAN,50568,META,VILLAVICENCIO,50001,2023,2,30",
        ]);
        let (records, report) = load_dispatches(file.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(report.rejected_rows, 0);
        assert_eq!(report.unresolved_codes, 2);

        assert!(records[0].origin.code.dane().is_none());
        assert_eq!(records[0].origin.municipality, "PUERTO GAITAN");
        assert_eq!(records[1].destination.code.as_str(), "ABCDE");
        assert_eq!(records[1].destination.municipality, "ABCDE");
        assert_eq!(records[2].origin.code.as_str(), "50568");
    }

    #[test]
    fn missing_required_columns_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "foo,bar\n1,2\n3,4").unwrap();
        file.flush().unwrap();
        let err = load_dispatches(file.path()).unwrap_err();
        match err {
            ReportError::InvalidInput(msg) => {
                assert!(msg.contains("PRODUCTO"), "{msg}");
                assert!(msg.contains("CODIGO_MUNICIPIO_DANE_DESTINO"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_dispatches(Path::new("/nonexistent/dispatches.csv")).unwrap_err();
        assert!(matches!(err, ReportError::Csv(_) | ReportError::Io(_)));
    }

    #[test]
    fn parses_polygons_and_multipolygons() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"dpto_ccdgo": "05", "mpio_ccdgo": "001", "mpio_cnmbr": "MEDELLIN"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"dpto_ccdgo": 11, "mpio_ccdgo": 1},
                    "geometry": {"type": "MultiPolygon", "coordinates": [[[[10.0, 10.0], [12.0, 10.0], [12.0, 12.0], [10.0, 10.0]]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"dpto_ccdgo": "05", "mpio_ccdgo": "002"},
                    "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}
                },
                {
                    "type": "Feature",
                    "properties": {"mpio_cnmbr": "SIN CODIGO"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}
                }
            ]
        });
        let geoms = parse_feature_collection(&doc).unwrap();
        assert_eq!(geoms.len(), 2);
        assert_eq!(geoms[0].code.as_str(), "05001");
        assert_eq!(geoms[0].name.as_deref(), Some("MEDELLIN"));
        let c = geoms[0].centroid.unwrap();
        assert!((c.x() - 1.0).abs() < 1e-9 && (c.y() - 1.0).abs() < 1e-9);
        assert_eq!(geoms[1].code.as_str(), "11001");
        assert!(geoms[1].centroid.is_some());
    }

    #[test]
    fn rejects_non_feature_collection() {
        let doc = json!({"type": "Feature", "properties": {}});
        assert!(matches!(
            parse_feature_collection(&doc),
            Err(ReportError::InvalidGeoJson(_))
        ));
    }
}

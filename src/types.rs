use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};
use geo::{MultiPolygon, Point};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize, Serializer};
use tabled::Tabled;

use crate::util::{format_int, format_number, zero_pad_digits};

/// Dispatches whose volume exceeds this many gallons are treated as
/// recording errors and their volume is dropped.
pub const VOLUME_OUTLIER_THRESHOLD: f64 = 3.1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Product {
    B100,
    Ethanol,
}

// Labels as they appear in the SICOM export plus the short forms.
static PRODUCT_ALIASES: Lazy<HashMap<&'static str, Product>> = Lazy::new(|| {
    HashMap::from([
        ("B 100", Product::B100),
        ("B100", Product::B100),
        ("ETANOL - ALCOHOL CARBURANTE", Product::Ethanol),
        ("ETANOL", Product::Ethanol),
        ("ETHANOL", Product::Ethanol),
    ])
});

impl Product {
    pub const ALL: [Product; 2] = [Product::B100, Product::Ethanol];

    pub fn from_label(label: &str) -> Option<Product> {
        PRODUCT_ALIASES
            .get(label.trim().to_uppercase().as_str())
            .copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Product::B100 => "B100",
            Product::Ethanol => "Ethanol",
        }
    }

    /// Series color shared by every chart and table header for this product.
    pub fn color(self) -> &'static str {
        match self {
            Product::B100 => "#57B4BA",
            Product::Ethanol => "#FE4F2D",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// DANE municipality code: 2-digit department + 3-digit municipality,
/// always stored as exactly five ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DaneCode(String);

impl DaneCode {
    /// Normalize a full code such as `5001` or `05001.0` to `05001`.
    pub fn normalize(raw: &str) -> Option<DaneCode> {
        zero_pad_digits(raw, 5).map(DaneCode)
    }

    /// Build a code from separate department and municipality parts.
    pub fn from_parts(department: &str, municipality: &str) -> Option<DaneCode> {
        let dpto = zero_pad_digits(department, 2)?;
        let mpio = zero_pad_digits(municipality, 3)?;
        Some(DaneCode(format!("{}{}", dpto, mpio)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DaneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Municipality identity as written in a dispatch record.
///
/// A code that does not normalize to a [`DaneCode`] is kept verbatim: the
/// record still counts in every table, but never matches a geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceCode {
    Dane(DaneCode),
    Unresolved { raw: String, municipality: String },
}

impl PlaceCode {
    pub fn from_raw(raw: Option<&str>, municipality: &str) -> PlaceCode {
        match raw.and_then(DaneCode::normalize) {
            Some(code) => PlaceCode::Dane(code),
            None => PlaceCode::Unresolved {
                raw: raw.unwrap_or_default().trim().to_string(),
                municipality: municipality.to_string(),
            },
        }
    }

    pub fn dane(&self) -> Option<&DaneCode> {
        match self {
            PlaceCode::Dane(code) => Some(code),
            PlaceCode::Unresolved { .. } => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlaceCode::Dane(code) => code.as_str(),
            PlaceCode::Unresolved { raw, .. } => raw,
        }
    }
}

impl fmt::Display for PlaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlaceCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct RawRow {
    #[serde(rename = "PRODUCTO")]
    pub product: Option<String>,
    #[serde(rename = "TIPO_COMPRADOR")]
    pub buyer_type: Option<String>,
    #[serde(rename = "DEPARTAMENTO_PROVEEDOR")]
    pub origin_department: Option<String>,
    #[serde(rename = "MUNICIPIO_PROVEEDOR")]
    pub origin_municipality: Option<String>,
    #[serde(rename = "CODIGO_MUNICIPIO_DANE_PROVEEDOR")]
    pub origin_code: Option<String>,
    #[serde(rename = "DEPARTAMENTO")]
    pub destination_department: Option<String>,
    #[serde(rename = "MUNICIPIO")]
    pub destination_municipality: Option<String>,
    #[serde(rename = "CODIGO_MUNICIPIO_DANE_DESTINO")]
    pub destination_code: Option<String>,
    #[serde(rename = "ANIO_DESPACHO")]
    pub year: Option<String>,
    #[serde(rename = "MES_DESPACHO")]
    pub month: Option<String>,
    #[serde(rename = "VOLUMEN_DESPACHADO")]
    pub volume: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub department: String,
    pub municipality: String,
    pub code: PlaceCode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub product: Product,
    pub year: i32,
    pub month: u32,
    /// Gallons; `None` when missing in the source or above
    /// [`VOLUME_OUTLIER_THRESHOLD`].
    pub volume: Option<f64>,
    pub buyer_type: Option<String>,
    pub origin: Place,
    pub destination: Place,
}

/// Replace implausible volumes with the missing-value sentinel.
///
/// Applying it twice gives the same result as applying it once.
pub fn apply_volume_threshold(volume: Option<f64>) -> Option<f64> {
    volume.filter(|v| *v <= VOLUME_OUTLIER_THRESHOLD)
}

#[derive(Debug, Clone)]
pub struct MunicipalityGeometry {
    pub code: DaneCode,
    pub name: Option<String>,
    pub shape: MultiPolygon<f64>,
    pub centroid: Option<Point<f64>>,
}

fn display_volume(v: &f64) -> String {
    format_number(*v, 2)
}

fn display_count(v: &u64) -> String {
    format_int(*v)
}

fn display_percent(v: &f64) -> String {
    format!("{:.2}%", v)
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct ProductCountRow {
    #[serde(rename = "Product")]
    #[tabled(rename = "Product")]
    pub product: Product,
    #[serde(rename = "Dispatches")]
    #[tabled(rename = "Dispatches", display_with = "display_count")]
    pub dispatches: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct YearlyDispatchRow {
    #[serde(rename = "Year")]
    #[tabled(rename = "Year")]
    pub year: i32,
    #[serde(rename = "TotalDispatches")]
    #[tabled(rename = "TotalDispatches", display_with = "display_count")]
    pub total: u64,
    #[serde(rename = "B100Dispatches")]
    #[tabled(rename = "B100Dispatches", display_with = "display_count")]
    pub b100: u64,
    #[serde(rename = "EthanolDispatches")]
    #[tabled(rename = "EthanolDispatches", display_with = "display_count")]
    pub ethanol: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyPoint {
    pub year: i32,
    pub month: u32,
    pub dispatches: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct YearlyVolumeRow {
    #[serde(rename = "Year")]
    #[tabled(rename = "Year")]
    pub year: i32,
    #[serde(rename = "B100Volume")]
    #[tabled(rename = "B100Volume", display_with = "display_volume")]
    pub b100_volume: f64,
    #[serde(rename = "EthanolVolume")]
    #[tabled(rename = "EthanolVolume", display_with = "display_volume")]
    pub ethanol_volume: f64,
}

impl YearlyVolumeRow {
    pub fn volume(&self, product: Product) -> f64 {
        match product {
            Product::B100 => self.b100_volume,
            Product::Ethanol => self.ethanol_volume,
        }
    }
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct BuyerTypeRow {
    #[serde(rename = "BuyerType")]
    #[tabled(rename = "BuyerType")]
    pub buyer_type: String,
    #[serde(rename = "Dispatches")]
    #[tabled(rename = "Dispatches", display_with = "display_count")]
    pub dispatches: u64,
    #[serde(rename = "Percentage")]
    #[tabled(rename = "Percentage", display_with = "display_percent")]
    pub percentage: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct MunicipalitySummaryRow {
    #[serde(rename = "Department")]
    #[tabled(rename = "Department")]
    pub department: String,
    #[serde(rename = "Municipality")]
    #[tabled(rename = "Municipality")]
    pub municipality: String,
    #[serde(rename = "DaneCode")]
    #[tabled(rename = "DaneCode")]
    pub code: PlaceCode,
    #[serde(rename = "Dispatches")]
    #[tabled(rename = "Dispatches", display_with = "display_count")]
    pub dispatches: u64,
    #[serde(rename = "EthanolVolume")]
    #[tabled(rename = "EthanolVolume", display_with = "display_volume")]
    pub ethanol_volume: f64,
    #[serde(rename = "B100Volume")]
    #[tabled(rename = "B100Volume", display_with = "display_volume")]
    pub b100_volume: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct PairCountRow {
    #[serde(rename = "OriginCode")]
    #[tabled(rename = "OriginCode")]
    pub origin_code: PlaceCode,
    #[serde(rename = "OriginMunicipality")]
    #[tabled(rename = "OriginMunicipality")]
    pub origin_municipality: String,
    #[serde(rename = "DestinationCode")]
    #[tabled(rename = "DestinationCode")]
    pub destination_code: PlaceCode,
    #[serde(rename = "DestinationMunicipality")]
    #[tabled(rename = "DestinationMunicipality")]
    pub destination_municipality: String,
    #[serde(rename = "Dispatches")]
    #[tabled(rename = "Dispatches", display_with = "display_count")]
    pub dispatches: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct FanOutRow {
    #[serde(rename = "DaneCode")]
    #[tabled(rename = "DaneCode")]
    pub code: PlaceCode,
    #[serde(rename = "Municipality")]
    #[tabled(rename = "Municipality")]
    pub municipality: String,
    #[serde(rename = "Relations")]
    #[tabled(rename = "Relations")]
    pub relations: usize,
}

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub total_dispatches: usize,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub b100_volume: f64,
    pub ethanol_volume: f64,
    pub missing_volumes: usize,
    pub origin_municipalities: usize,
    pub destination_municipalities: usize,
    pub dispatch_pairs: usize,
    pub unmatched_origin_geometries: usize,
    pub unmatched_destination_geometries: usize,
    pub connections_drawn: usize,
    pub connections_skipped: usize,
    pub connections_unmapped: usize,
    pub generated_at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_labels_from_source_export() {
        assert_eq!(Product::from_label("B 100"), Some(Product::B100));
        assert_eq!(Product::from_label(" b100 "), Some(Product::B100));
        assert_eq!(
            Product::from_label("ETANOL - ALCOHOL CARBURANTE"),
            Some(Product::Ethanol)
        );
        assert_eq!(Product::from_label("DIESEL"), None);
    }

    #[test]
    fn dane_codes_are_five_digits() {
        for raw in ["5001", "05001", "11001", "8001.0", "1"] {
            let code = DaneCode::normalize(raw).unwrap();
            assert_eq!(code.as_str().len(), 5, "{raw}");
        }
        assert_eq!(DaneCode::normalize("5001").unwrap().as_str(), "05001");
        assert_eq!(DaneCode::from_parts("5", "1").unwrap().as_str(), "05001");
        assert_eq!(DaneCode::from_parts("11", "001").unwrap().as_str(), "11001");
        assert!(DaneCode::from_parts("5", "1234").is_none());
        assert!(DaneCode::normalize("").is_none());
    }

    #[test]
    fn unusable_codes_stay_unresolved() {
        let code = PlaceCode::from_raw(Some("5001"), "MEDELLIN");
        assert_eq!(code.dane().map(DaneCode::as_str), Some("05001"));

        let blank = PlaceCode::from_raw(Some("  "), "MEDELLIN");
        assert!(blank.dane().is_none());
        assert_eq!(blank.as_str(), "");
        assert_ne!(blank, PlaceCode::from_raw(None, "CALI"));
        assert_eq!(PlaceCode::from_raw(Some("ABCDE"), "X").to_string(), "ABCDE");
    }

    #[test]
    fn volume_threshold_is_idempotent() {
        let inputs = [Some(10.0), Some(3.1e6), Some(3.1e6 + 1.0), None];
        for v in inputs {
            let once = apply_volume_threshold(v);
            assert_eq!(apply_volume_threshold(once), once);
        }
        assert_eq!(apply_volume_threshold(Some(3.1e6)), Some(3.1e6));
        assert_eq!(apply_volume_threshold(Some(4.0e6)), None);
    }
}

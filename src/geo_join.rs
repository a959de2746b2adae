//! Spatial join between dispatch records and municipality geometry.
//!
//! The code -> geometry lookup is built once; map layers and connection
//! endpoints are resolved against it with plain hash lookups, so the cost is
//! linear in the number of records and pairs.
use std::collections::{BTreeSet, HashMap, HashSet};

use geo::Point;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{
    DaneCode, DispatchRecord, MunicipalityGeometry, PairCountRow, Place, PlaceCode,
};

pub struct GeoIndex {
    by_code: HashMap<DaneCode, MunicipalityGeometry>,
}

impl GeoIndex {
    /// Index geometries by DANE code. A repeated code replaces the earlier
    /// geometry.
    pub fn build(geometries: Vec<MunicipalityGeometry>) -> Self {
        let mut by_code = HashMap::with_capacity(geometries.len());
        for g in geometries {
            let code = g.code.clone();
            if by_code.insert(code.clone(), g).is_some() {
                debug!(%code, "duplicate municipality geometry replaced");
            }
        }
        GeoIndex { by_code }
    }

    pub fn resolve(&self, code: &DaneCode) -> Option<&MunicipalityGeometry> {
        self.by_code.get(code)
    }

    /// Geometry for a record's place. Unresolved codes never match.
    pub fn locate(&self, code: &PlaceCode) -> Option<&MunicipalityGeometry> {
        code.dane().and_then(|c| self.resolve(c))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Provider,
    Destination,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Provider => "Provider",
            Role::Destination => "Destination",
        }
    }
}

/// A municipality drawn on the map, labelled with the name used in the
/// dispatch records.
#[derive(Debug, Clone)]
pub struct MapArea<'a> {
    pub code: DaneCode,
    pub label: String,
    pub geometry: &'a MunicipalityGeometry,
}

#[derive(Debug, Default)]
pub struct MunicipalityLayers<'a> {
    pub providers: Vec<MapArea<'a>>,
    pub destinations: Vec<MapArea<'a>>,
    pub unmatched_providers: BTreeSet<PlaceCode>,
    pub unmatched_destinations: BTreeSet<PlaceCode>,
}

/// Provider and destination areas, one per distinct code. Codes without a
/// geometry are reported as unmatched and left off the map.
pub fn municipality_layers<'a>(
    records: &[DispatchRecord],
    index: &'a GeoIndex,
) -> MunicipalityLayers<'a> {
    let (providers, unmatched_providers) = resolve_places(records.iter().map(|r| &r.origin), index);
    let (destinations, unmatched_destinations) =
        resolve_places(records.iter().map(|r| &r.destination), index);
    if !unmatched_providers.is_empty() || !unmatched_destinations.is_empty() {
        warn!(
            providers = unmatched_providers.len(),
            destinations = unmatched_destinations.len(),
            "municipality codes without geometry left off the map"
        );
    }
    MunicipalityLayers {
        providers,
        destinations,
        unmatched_providers,
        unmatched_destinations,
    }
}

fn resolve_places<'a, 'r, I>(
    places: I,
    index: &'a GeoIndex,
) -> (Vec<MapArea<'a>>, BTreeSet<PlaceCode>)
where
    I: Iterator<Item = &'r Place>,
{
    let mut seen: HashSet<&PlaceCode> = HashSet::new();
    let mut areas = Vec::new();
    let mut unmatched = BTreeSet::new();
    for place in places {
        if !seen.insert(&place.code) {
            continue;
        }
        match index.locate(&place.code) {
            Some(geometry) => areas.push(MapArea {
                code: geometry.code.clone(),
                label: place.municipality.clone(),
                geometry,
            }),
            None => {
                unmatched.insert(place.code.clone());
            }
        }
    }
    (areas, unmatched)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub code: DaneCode,
    pub label: String,
    pub role: Role,
    pub lat: f64,
    pub lon: f64,
}

/// One centroid marker per mapped municipality and role.
pub fn centroid_markers(layers: &MunicipalityLayers<'_>) -> Vec<Marker> {
    let providers = layers.providers.iter().map(|a| (a, Role::Provider));
    let destinations = layers.destinations.iter().map(|a| (a, Role::Destination));
    providers
        .chain(destinations)
        .filter_map(|(area, role)| {
            let (lat, lon) = finite_lat_lon(area.geometry.centroid?)?;
            Some(Marker {
                code: area.code.clone(),
                label: area.label.clone(),
                role,
                lat,
                lon,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub origin: String,
    pub destination: String,
    pub dispatches: u64,
    pub from: [f64; 2],
    pub to: [f64; 2],
}

#[derive(Debug, Default)]
pub struct ConnectionSet {
    pub lines: Vec<Connection>,
    /// Pairs dropped because an endpoint centroid was not finite.
    pub skipped: usize,
    /// Pairs dropped because an endpoint has no geometry or centroid.
    pub unmapped: usize,
}

/// Join the pair table against endpoint centroids.
pub fn connections(pairs: &[PairCountRow], index: &GeoIndex) -> ConnectionSet {
    let mut set = ConnectionSet::default();
    for pair in pairs {
        let origin = index.locate(&pair.origin_code).and_then(|g| g.centroid);
        let destination = index
            .locate(&pair.destination_code)
            .and_then(|g| g.centroid);
        let (Some(origin), Some(destination)) = (origin, destination) else {
            set.unmapped += 1;
            continue;
        };
        let (Some(from), Some(to)) = (finite_lat_lon(origin), finite_lat_lon(destination)) else {
            warn!(
                origin = %pair.origin_municipality,
                destination = %pair.destination_municipality,
                "missing centroid coordinates, connection skipped"
            );
            set.skipped += 1;
            continue;
        };
        set.lines.push(Connection {
            origin: pair.origin_municipality.clone(),
            destination: pair.destination_municipality.clone(),
            dispatches: pair.dispatches,
            from: [from.0, from.1],
            to: [to.0, to.1],
        });
    }
    debug!(
        drawn = set.lines.len(),
        skipped = set.skipped,
        unmapped = set.unmapped,
        "resolved dispatch connections"
    );
    set
}

fn finite_lat_lon(p: Point<f64>) -> Option<(f64, f64)> {
    let (lat, lon) = (p.y(), p.x());
    if lat.is_finite() && lon.is_finite() {
        Some((lat, lon))
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reports::pair_counts;
    use crate::reports::tests::sample;
    use geo::{polygon, Centroid, MultiPolygon};

    pub(crate) fn square(code: &str, x: f64, y: f64) -> MunicipalityGeometry {
        let shape = MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ]]);
        MunicipalityGeometry {
            code: DaneCode::normalize(code).unwrap(),
            name: None,
            centroid: shape.centroid(),
            shape,
        }
    }

    /// Geometry for every sample municipality except Cartagena (13001).
    pub(crate) fn sample_index() -> GeoIndex {
        GeoIndex::build(vec![
            square("25269", -74.4, 4.8),
            square("76248", -76.3, 3.7),
            square("11001", -74.1, 4.6),
            square("05001", -75.6, 6.2),
        ])
    }

    #[test]
    fn resolve_uses_exact_codes() {
        let index = sample_index();
        assert_eq!(index.len(), 4);
        assert!(index.resolve(&DaneCode::normalize("5001").unwrap()).is_some());
        assert!(index.resolve(&DaneCode::normalize("13001").unwrap()).is_none());
    }

    #[test]
    fn layers_dedupe_and_report_unmatched() {
        let data = sample();
        let index = sample_index();
        let layers = municipality_layers(&data, &index);
        assert_eq!(layers.providers.len(), 2);
        assert_eq!(layers.destinations.len(), 2);
        assert!(layers.unmatched_providers.is_empty());
        assert_eq!(
            layers.unmatched_destinations.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            vec!["13001"]
        );
        let markers = centroid_markers(&layers);
        assert_eq!(markers.len(), 4);
        assert_eq!(markers.iter().filter(|m| m.role == Role::Provider).count(), 2);
    }

    #[test]
    fn connections_skip_unmapped_pairs() {
        let data = sample();
        let pairs = pair_counts(&data);
        let set = connections(&pairs, &sample_index());
        // Both pairs into Cartagena have no destination geometry.
        assert_eq!(set.unmapped, 2);
        assert_eq!(set.skipped, 0);
        assert_eq!(set.lines.len(), 4);
        let line = set
            .lines
            .iter()
            .find(|c| c.origin == "FACATATIVA" && c.destination == "BOGOTA D.C.")
            .unwrap();
        assert_eq!(line.dispatches, 2);
        assert!((line.from[0] - 5.3).abs() < 1e-9);
        assert!((line.from[1] - -73.9).abs() < 1e-9);
    }

    #[test]
    fn unresolved_codes_never_join() {
        let mut data = sample();
        data[0].origin.code = PlaceCode::from_raw(Some(""), "FACATATIVA");
        let index = sample_index();
        assert!(index.locate(&data[0].origin.code).is_none());

        let layers = municipality_layers(&data, &index);
        // Other FACATATIVA rows still carry the real code.
        assert_eq!(layers.providers.len(), 2);
        assert_eq!(layers.unmatched_providers.len(), 1);
        assert!(layers.unmatched_providers.iter().all(|c| c.dane().is_none()));

        let pairs = pair_counts(&data);
        assert_eq!(pairs.len(), 7);
        let set = connections(&pairs, &index);
        assert_eq!(set.unmapped, 3);
        assert_eq!(set.lines.len(), 4);
    }

    #[test]
    fn non_finite_centroid_skips_only_that_connection() {
        let mut bad = square("11001", -74.1, 4.6);
        bad.centroid = Some(Point::new(f64::NAN, 4.6));
        let index = GeoIndex::build(vec![
            square("25269", -74.4, 4.8),
            square("76248", -76.3, 3.7),
            square("05001", -75.6, 6.2),
            bad,
        ]);
        let pairs = pair_counts(&sample());
        let set = connections(&pairs, &index);
        // FACATATIVA and EL CERRITO both ship to Bogota.
        assert_eq!(set.skipped, 2);
        assert_eq!(set.lines.len(), 2);
        assert!(set.lines.iter().all(|c| c.destination == "MEDELLIN"));
    }
}

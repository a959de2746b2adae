use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Local;

use crate::geo_join::{ConnectionSet, MunicipalityLayers};
use crate::loader::LoadReport;
use crate::types::{
    BuyerTypeRow, DispatchRecord, FanOutRow, MonthlyPoint, MunicipalitySummaryRow, PairCountRow,
    Place, PlaceCode, Product, ProductCountRow, SummaryStats, YearlyDispatchRow,
    YearlyVolumeRow,
};

/// Dispatch count per product, largest first.
pub fn count_by_product(data: &[DispatchRecord]) -> Vec<ProductCountRow> {
    let mut counts: BTreeMap<Product, u64> = BTreeMap::new();
    for r in data {
        *counts.entry(r.product).or_default() += 1;
    }
    let mut rows: Vec<ProductCountRow> = counts
        .into_iter()
        .map(|(product, dispatches)| ProductCountRow {
            product,
            dispatches,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.dispatches
            .cmp(&a.dispatches)
            .then_with(|| a.product.cmp(&b.product))
    });
    rows
}

pub fn dispatches_by_year(data: &[DispatchRecord]) -> Vec<YearlyDispatchRow> {
    let mut map: BTreeMap<i32, YearlyDispatchRow> = BTreeMap::new();
    for r in data {
        let e = map.entry(r.year).or_insert(YearlyDispatchRow {
            year: r.year,
            total: 0,
            b100: 0,
            ethanol: 0,
        });
        e.total += 1;
        match r.product {
            Product::B100 => e.b100 += 1,
            Product::Ethanol => e.ethanol += 1,
        }
    }
    map.into_values().collect()
}

/// Dispatch count per (year, month) for one product, ordered by year then
/// month. Months without dispatches are absent.
pub fn monthly_dispatches(data: &[DispatchRecord], product: Product) -> Vec<MonthlyPoint> {
    let mut map: BTreeMap<(i32, u32), u64> = BTreeMap::new();
    for r in data.iter().filter(|r| r.product == product) {
        *map.entry((r.year, r.month)).or_default() += 1;
    }
    map.into_iter()
        .map(|((year, month), dispatches)| MonthlyPoint {
            year,
            month,
            dispatches,
        })
        .collect()
}

/// Summed volume per year and product. Missing volumes contribute nothing.
pub fn volume_by_year(data: &[DispatchRecord]) -> Vec<YearlyVolumeRow> {
    let mut map: BTreeMap<i32, YearlyVolumeRow> = BTreeMap::new();
    for r in data {
        let e = map.entry(r.year).or_insert(YearlyVolumeRow {
            year: r.year,
            b100_volume: 0.0,
            ethanol_volume: 0.0,
        });
        if let Some(v) = r.volume {
            match r.product {
                Product::B100 => e.b100_volume += v,
                Product::Ethanol => e.ethanol_volume += v,
            }
        }
    }
    map.into_values().collect()
}

/// Non-missing volumes of one product, in input order.
pub fn volumes_for(data: &[DispatchRecord], product: Product) -> Vec<f64> {
    data.iter()
        .filter(|r| r.product == product)
        .filter_map(|r| r.volume)
        .collect()
}

/// Count and share of each buyer type. Records without a buyer type are
/// left out of both the counts and the denominator.
pub fn buyer_type_shares(data: &[DispatchRecord]) -> Vec<BuyerTypeRow> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for r in data {
        if let Some(b) = r.buyer_type.as_deref() {
            *counts.entry(b).or_default() += 1;
        }
    }
    let total: u64 = counts.values().sum();
    let mut rows: Vec<BuyerTypeRow> = counts
        .into_iter()
        .map(|(buyer_type, dispatches)| BuyerTypeRow {
            buyer_type: buyer_type.to_string(),
            dispatches,
            percentage: if total == 0 {
                0.0
            } else {
                dispatches as f64 / total as f64 * 100.0
            },
        })
        .collect();
    rows.sort_by(|a, b| {
        b.dispatches
            .cmp(&a.dispatches)
            .then_with(|| a.buyer_type.cmp(&b.buyer_type))
    });
    rows
}

pub fn summarize_origins(data: &[DispatchRecord]) -> Vec<MunicipalitySummaryRow> {
    summarize_places(data, |r| &r.origin)
}

pub fn summarize_destinations(data: &[DispatchRecord]) -> Vec<MunicipalitySummaryRow> {
    summarize_places(data, |r| &r.destination)
}

fn summarize_places<F>(data: &[DispatchRecord], place: F) -> Vec<MunicipalitySummaryRow>
where
    F: Fn(&DispatchRecord) -> &Place,
{
    let mut map: HashMap<&PlaceCode, MunicipalitySummaryRow> = HashMap::new();
    for r in data {
        let p = place(r);
        let e = map.entry(&p.code).or_insert_with(|| MunicipalitySummaryRow {
            department: p.department.clone(),
            municipality: p.municipality.clone(),
            code: p.code.clone(),
            dispatches: 0,
            ethanol_volume: 0.0,
            b100_volume: 0.0,
        });
        e.dispatches += 1;
        if let Some(v) = r.volume {
            match r.product {
                Product::B100 => e.b100_volume += v,
                Product::Ethanol => e.ethanol_volume += v,
            }
        }
    }
    let mut rows: Vec<MunicipalitySummaryRow> = map.into_values().collect();
    rows.sort_by(|a, b| {
        a.department
            .cmp(&b.department)
            .then_with(|| a.municipality.cmp(&b.municipality))
            .then_with(|| a.code.cmp(&b.code))
    });
    rows
}

/// Dispatch count per unique (origin, destination) municipality pair.
pub fn pair_counts(data: &[DispatchRecord]) -> Vec<PairCountRow> {
    let mut map: HashMap<(&PlaceCode, &PlaceCode), PairCountRow> = HashMap::new();
    for r in data {
        let e = map
            .entry((&r.origin.code, &r.destination.code))
            .or_insert_with(|| PairCountRow {
                origin_code: r.origin.code.clone(),
                origin_municipality: r.origin.municipality.clone(),
                destination_code: r.destination.code.clone(),
                destination_municipality: r.destination.municipality.clone(),
                dispatches: 0,
            });
        e.dispatches += 1;
    }
    let mut rows: Vec<PairCountRow> = map.into_values().collect();
    rows.sort_by(|a, b| {
        a.origin_municipality
            .cmp(&b.origin_municipality)
            .then_with(|| a.destination_municipality.cmp(&b.destination_municipality))
            .then_with(|| a.origin_code.cmp(&b.origin_code))
            .then_with(|| a.destination_code.cmp(&b.destination_code))
    });
    rows
}

/// Number of distinct destinations each origin ships to.
pub fn origin_fan_out(pairs: &[PairCountRow]) -> Vec<FanOutRow> {
    fan_out(pairs.iter().map(|p| {
        (
            &p.origin_code,
            &p.origin_municipality,
            &p.destination_code,
        )
    }))
}

/// Number of distinct origins each destination receives from.
pub fn destination_fan_out(pairs: &[PairCountRow]) -> Vec<FanOutRow> {
    fan_out(pairs.iter().map(|p| {
        (
            &p.destination_code,
            &p.destination_municipality,
            &p.origin_code,
        )
    }))
}

fn fan_out<'a, I>(edges: I) -> Vec<FanOutRow>
where
    I: Iterator<Item = (&'a PlaceCode, &'a String, &'a PlaceCode)>,
{
    let mut map: HashMap<&PlaceCode, (&String, HashSet<&PlaceCode>)> = HashMap::new();
    for (code, name, counterpart) in edges {
        map.entry(code)
            .or_insert_with(|| (name, HashSet::new()))
            .1
            .insert(counterpart);
    }
    let mut rows: Vec<FanOutRow> = map
        .into_iter()
        .map(|(code, (name, counterparts))| FanOutRow {
            code: code.clone(),
            municipality: name.clone(),
            relations: counterparts.len(),
        })
        .collect();
    rows.sort_by(|a, b| {
        a.municipality
            .cmp(&b.municipality)
            .then_with(|| a.code.cmp(&b.code))
    });
    rows
}

/// The municipality with the most dispatches, ties broken by name.
pub fn busiest(rows: &[MunicipalitySummaryRow]) -> Option<&MunicipalitySummaryRow> {
    rows.iter().max_by(|a, b| {
        a.dispatches
            .cmp(&b.dispatches)
            .then_with(|| b.municipality.cmp(&a.municipality))
    })
}

/// The municipality with the widest fan-out, ties broken by name.
pub fn widest_fan_out(rows: &[FanOutRow]) -> Option<&FanOutRow> {
    rows.iter().max_by(|a, b| {
        a.relations
            .cmp(&b.relations)
            .then_with(|| b.municipality.cmp(&a.municipality))
    })
}

pub fn generate_summary(
    data: &[DispatchRecord],
    load: &LoadReport,
    pairs: &[PairCountRow],
    layers: &MunicipalityLayers<'_>,
    connections: &ConnectionSet,
) -> SummaryStats {
    let years: BTreeSet<i32> = data.iter().map(|r| r.year).collect();
    let total_volume = |product: Product| -> f64 { volumes_for(data, product).iter().sum() };
    let origins: HashSet<&PlaceCode> = data.iter().map(|r| &r.origin.code).collect();
    let destinations: HashSet<&PlaceCode> = data.iter().map(|r| &r.destination.code).collect();
    SummaryStats {
        total_dispatches: data.len(),
        first_year: years.first().copied(),
        last_year: years.last().copied(),
        b100_volume: total_volume(Product::B100),
        ethanol_volume: total_volume(Product::Ethanol),
        missing_volumes: load.missing_volumes + load.outlier_volumes,
        origin_municipalities: origins.len(),
        destination_municipalities: destinations.len(),
        dispatch_pairs: pairs.len(),
        unmatched_origin_geometries: layers.unmatched_providers.len(),
        unmatched_destination_geometries: layers.unmatched_destinations.len(),
        connections_drawn: connections.lines.len(),
        connections_skipped: connections.skipped,
        connections_unmapped: connections.unmapped,
        generated_at: Local::now(),
    }
}

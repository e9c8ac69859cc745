//! Class grid → density grid, and density grid → zonal totals.
//!
//! Both passes walk the grid in tiles of [`crate::grid::TILE_ROWS`] rows.
//! Density tiles are mapped in parallel; zonal sums are accumulated in cell
//! order so every total is bit-identical to a single naive pass. Independent
//! zones are summed in parallel.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CarbonError, Result};
use crate::grid::{ensure_aligned, ClassGrid, DensityGrid};
use crate::pools::PoolTable;
use crate::zone::{Zone, ZoneSet};

/// Share of nodata cells above which a zone is reported as mostly unmapped.
pub const NODATA_WARN_FRACTION: f64 = 0.5;

/// Mean carbon density of a zone. `Undefined` when the zone has no valid
/// cells; serialized as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeanDensity {
    Defined(f64),
    Undefined,
}

impl MeanDensity {
    pub fn value(self) -> Option<f64> {
        match self {
            MeanDensity::Defined(v) => Some(v),
            MeanDensity::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, MeanDensity::Undefined)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatistics {
    /// Valid (non-nodata) cells inside the zone.
    pub cell_count: usize,
    /// Cells inside the zone that hold nodata.
    pub excluded_nodata_count: usize,
    pub area_ha: f64,
    pub total_carbon_mg: f64,
    pub mean_density: MeanDensity,
    pub min_density: Option<f64>,
    pub max_density: Option<f64>,
    /// Median of the valid cell densities; `None` when there are none.
    pub median_density: Option<f64>,
}

impl ZonalStatistics {
    /// Fraction of the zone's cells that are nodata; zero for an empty zone.
    pub fn nodata_fraction(&self) -> f64 {
        let all = self.cell_count + self.excluded_nodata_count;
        if all == 0 {
            0.0
        } else {
            self.excluded_nodata_count as f64 / all as f64
        }
    }
}

#[derive(Default)]
struct Accumulator {
    cells: usize,
    excluded: usize,
    total: f64,
    min: Option<f64>,
    max: Option<f64>,
    values: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, density: Option<f64>, cell_size_ha: f64) {
        match density {
            Some(d) => {
                self.cells += 1;
                self.total += d * cell_size_ha;
                self.min = Some(self.min.map_or(d, |m| m.min(d)));
                self.max = Some(self.max.map_or(d, |m| m.max(d)));
                self.values.push(d);
            }
            None => self.excluded += 1,
        }
    }

    fn finish(mut self, cell_size_ha: f64) -> ZonalStatistics {
        let median_density = median(&mut self.values);
        let area_ha = self.cells as f64 * cell_size_ha;
        let mean_density = if self.cells == 0 {
            MeanDensity::Undefined
        } else {
            MeanDensity::Defined(self.total / area_ha)
        };
        ZonalStatistics {
            cell_count: self.cells,
            excluded_nodata_count: self.excluded,
            area_ha,
            total_carbon_mg: self.total,
            mean_density,
            min_density: self.min,
            max_density: self.max,
            median_density,
        }
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Per-class split of a zone's carbon. Cells whose class is nodata land in
/// `unclassified`, so the classes plus `unclassified` cover the whole zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassBreakdown {
    pub classes: BTreeMap<i32, ZonalStatistics>,
    pub unclassified: ZonalStatistics,
}

/// Map every class code to its total pool density.
///
/// Every code is checked against the pool table before any cell is written;
/// an unknown code fails with [`CarbonError::UnknownClass`].
pub fn density(grid: &ClassGrid, pools: &PoolTable) -> Result<DensityGrid> {
    grid.validate_against(pools)?;
    let lookup: HashMap<i32, f64> = pools
        .classes()
        .map(|class| (class.code, class.pools.total()))
        .collect();
    let nodata = DensityGrid::DEFAULT_NODATA;
    let extent = grid.extent();

    let tiles = grid
        .cells()
        .par_chunks(extent.tile_len())
        .map(|tile| {
            tile.iter()
                .map(|&code| {
                    if grid.is_nodata(code) {
                        Ok(nodata)
                    } else {
                        lookup
                            .get(&code)
                            .copied()
                            .ok_or(CarbonError::UnknownClass { code, cells: 1 })
                    }
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    debug!(extent = %extent, tiles = tiles.len(), "density grid computed");
    Ok(DensityGrid::from_parts(
        extent,
        grid.cell_size_ha(),
        nodata,
        tiles.concat(),
    ))
}

/// Scenario density that reuses `base_density` wherever the class is
/// unchanged and takes the pool-table density for reassigned cells. This is
/// how a precomputed baseline density is carried into a scenario.
pub fn overlay_density(
    base_density: &DensityGrid,
    base_classes: &ClassGrid,
    scenario_classes: &ClassGrid,
    pools: &PoolTable,
) -> Result<DensityGrid> {
    ensure_aligned("base density vs base classes", base_density.geometry(), base_classes.geometry())?;
    ensure_aligned("base classes vs scenario classes", base_classes.geometry(), scenario_classes.geometry())?;

    let mut missing: BTreeMap<i32, usize> = BTreeMap::new();
    for (&before, &after) in base_classes.cells().iter().zip(scenario_classes.cells()) {
        if before != after && !scenario_classes.is_nodata(after) && !pools.contains(after) {
            *missing.entry(after).or_insert(0) += 1;
        }
    }
    if let Some((code, cells)) = missing.into_iter().next() {
        return Err(CarbonError::UnknownClass { code, cells });
    }

    let nodata = base_density.nodata();
    let cells: Vec<f64> = base_density
        .cells()
        .iter()
        .zip(base_classes.cells().iter().zip(scenario_classes.cells()))
        .map(|(&density, (&before, &after))| {
            if before == after {
                density
            } else if scenario_classes.is_nodata(after) {
                nodata
            } else {
                pools.total_density(after).unwrap_or(nodata)
            }
        })
        .collect();

    Ok(DensityGrid::from_parts(
        base_density.extent(),
        base_density.cell_size_ha(),
        nodata,
        cells,
    ))
}

/// Carbon totals for one zone.
///
/// Nodata cells inside the zone are left out of the totals and counted in
/// `excluded_nodata_count`. A zone with no valid cells yields
/// [`MeanDensity::Undefined`].
pub fn zonal_statistics(density: &DensityGrid, zone: &Zone) -> Result<ZonalStatistics> {
    zone.ensure_extent(density.extent())?;
    let cell_size = density.cell_size_ha();
    let tile_len = density.extent().tile_len();

    let mut acc = Accumulator::default();
    for (tile, mask) in density
        .cells()
        .chunks(tile_len)
        .zip(zone.mask().chunks(tile_len))
    {
        for (&value, _) in tile.iter().zip(mask).filter(|(_, inside)| **inside) {
            let valid = (!density.is_nodata(value)).then_some(value);
            acc.push(valid, cell_size);
        }
    }
    let stats = acc.finish(cell_size);

    debug!(
        zone = zone.name(),
        cells = stats.cell_count,
        excluded = stats.excluded_nodata_count,
        total_carbon_mg = stats.total_carbon_mg,
        "zonal statistics"
    );
    if stats.mean_density.is_undefined() {
        warn!(zone = zone.name(), "zone has no valid cells, mean density undefined");
    } else if stats.nodata_fraction() > NODATA_WARN_FRACTION {
        warn!(
            zone = zone.name(),
            nodata_fraction = stats.nodata_fraction(),
            "zone is mostly unmapped"
        );
    }
    Ok(stats)
}

/// Statistics for every zone of a set, keyed by zone name. All extents are
/// checked before any zone is summed.
pub fn zonal_statistics_all(
    density: &DensityGrid,
    zones: &ZoneSet,
) -> Result<BTreeMap<String, ZonalStatistics>> {
    zones.ensure_extent(density.extent())?;
    zones
        .as_slice()
        .par_iter()
        .map(|zone| Ok((zone.name().to_string(), zonal_statistics(density, zone)?)))
        .collect()
}

/// Per-class breakdown of a zone's carbon. Valid density under a nodata
/// class is kept in [`ClassBreakdown::unclassified`].
pub fn zonal_statistics_by_class(
    classes: &ClassGrid,
    density: &DensityGrid,
    zone: &Zone,
) -> Result<ClassBreakdown> {
    ensure_aligned("classes vs density", classes.geometry(), density.geometry())?;
    zone.ensure_extent(density.extent())?;
    let cell_size = density.cell_size_ha();

    let mut per_class: BTreeMap<i32, Accumulator> = BTreeMap::new();
    let mut unclassified = Accumulator::default();
    for ((&code, &value), _) in classes
        .cells()
        .iter()
        .zip(density.cells())
        .zip(zone.mask())
        .filter(|(_, inside)| **inside)
    {
        let valid = (!density.is_nodata(value)).then_some(value);
        if classes.is_nodata(code) {
            unclassified.push(valid, cell_size);
        } else {
            per_class.entry(code).or_default().push(valid, cell_size);
        }
    }
    Ok(ClassBreakdown {
        classes: per_class
            .into_iter()
            .map(|(code, acc)| (code, acc.finish(cell_size)))
            .collect(),
        unclassified: unclassified.finish(cell_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridExtent;
    use crate::pools::{CarbonPools, LandCoverClass};

    fn pools() -> PoolTable {
        PoolTable::new([
            LandCoverClass::new(1, "forest", CarbonPools::new(300.0, 0.0, 0.0, 0.0)),
            LandCoverClass::new(2, "mine", CarbonPools::new(0.0, 0.0, 20.0, 0.0)),
        ])
        .unwrap()
    }

    fn grid() -> ClassGrid {
        ClassGrid::from_rows(&[vec![1, 1], vec![2, 0]], 1.0, 0).unwrap()
    }

    #[test]
    fn test_density_propagates_nodata() {
        let d = density(&grid(), &pools()).unwrap();
        assert_eq!(d.get(0, 0), Some(300.0));
        assert_eq!(d.get(1, 0), Some(20.0));
        assert_eq!(d.get(1, 1), None);
    }

    #[test]
    fn test_unknown_class_is_fatal() {
        let g = ClassGrid::from_rows(&[vec![1, 9], vec![9, 0]], 1.0, 0).unwrap();
        match density(&g, &pools()).unwrap_err() {
            CarbonError::UnknownClass { code, cells } => {
                assert_eq!(code, 9);
                assert_eq!(cells, 2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_zone_over_whole_grid() {
        let d = density(&grid(), &pools()).unwrap();
        let stats = zonal_statistics(&d, &Zone::all("all", d.extent())).unwrap();
        assert_eq!(stats.cell_count, 3);
        assert_eq!(stats.excluded_nodata_count, 1);
        assert_eq!(stats.area_ha, 3.0);
        assert_eq!(stats.total_carbon_mg, 620.0);
        let mean = stats.mean_density.value().unwrap();
        assert!((mean - 206.666_666).abs() < 1e-3);
        assert_eq!(stats.min_density, Some(20.0));
        assert_eq!(stats.max_density, Some(300.0));
    }

    #[test]
    fn test_nodata_only_zone_is_undefined() {
        let d = density(&grid(), &pools()).unwrap();
        let zone = Zone::window("gap", d.extent(), 1..2, 1..2).unwrap();
        let stats = zonal_statistics(&d, &zone).unwrap();
        assert_eq!(stats.cell_count, 0);
        assert_eq!(stats.excluded_nodata_count, 1);
        assert_eq!(stats.total_carbon_mg, 0.0);
        assert!(stats.mean_density.is_undefined());
        assert_eq!(stats.nodata_fraction(), 1.0);
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["mean_density"].is_null());
    }

    #[test]
    fn test_zone_extent_mismatch() {
        let d = density(&grid(), &pools()).unwrap();
        let zone = Zone::all("big", GridExtent::new(3, 3));
        assert!(matches!(
            zonal_statistics(&d, &zone),
            Err(CarbonError::ZoneExtentMismatch { .. })
        ));
    }

    #[test]
    fn test_cell_size_weights_totals() {
        let g = ClassGrid::from_rows(&[vec![1, 2]], 0.09, 0).unwrap();
        let d = density(&g, &pools()).unwrap();
        let stats = zonal_statistics(&d, &Zone::all("all", d.extent())).unwrap();
        assert!((stats.area_ha - 0.18).abs() < 1e-12);
        assert!((stats.total_carbon_mg - 320.0 * 0.09).abs() < 1e-9);
        assert!((stats.mean_density.value().unwrap() - 160.0).abs() < 1e-9);
    }

    #[test]
    fn test_by_class_breakdown() {
        let g = grid();
        let d = density(&g, &pools()).unwrap();
        let split = zonal_statistics_by_class(&g, &d, &Zone::all("all", d.extent())).unwrap();
        assert_eq!(split.classes.len(), 2);
        assert_eq!(split.classes[&1].total_carbon_mg, 600.0);
        assert_eq!(split.classes[&2].cell_count, 1);
        assert_eq!(split.unclassified.cell_count, 0);
        assert_eq!(split.unclassified.excluded_nodata_count, 1);
    }

    #[test]
    fn test_by_class_keeps_density_under_nodata_class() {
        let g = grid();
        let measured = DensityGrid::from_rows(&[vec![300.0, 300.0], vec![20.0, 100.0]], 1.0, -9999.0).unwrap();
        let split = zonal_statistics_by_class(&g, &measured, &Zone::all("all", g.extent())).unwrap();
        assert_eq!(split.unclassified.total_carbon_mg, 100.0);
        let classified: f64 = split.classes.values().map(|s| s.total_carbon_mg).sum();
        let total = zonal_statistics(&measured, &Zone::all("all", g.extent())).unwrap();
        assert_eq!(classified + split.unclassified.total_carbon_mg, total.total_carbon_mg);
    }

    #[test]
    fn test_median_density() {
        let odd = DensityGrid::from_rows(&[vec![5.0, 1.0, 300.0]], 1.0, -9999.0).unwrap();
        let stats = zonal_statistics(&odd, &Zone::all("all", odd.extent())).unwrap();
        assert_eq!(stats.median_density, Some(5.0));

        let even = DensityGrid::from_rows(&[vec![40.0, -9999.0, 10.0, 20.0, 30.0]], 1.0, -9999.0).unwrap();
        let stats = zonal_statistics(&even, &Zone::all("all", even.extent())).unwrap();
        assert_eq!(stats.median_density, Some(25.0));

        let empty = Zone::window("gap", even.extent(), 0..1, 1..2).unwrap();
        assert_eq!(zonal_statistics(&even, &empty).unwrap().median_density, None);
    }

    #[test]
    fn test_overlay_keeps_unchanged_cells() {
        let base = grid();
        let precomputed = DensityGrid::from_rows(&[vec![280.0, 310.0], vec![25.0, -9999.0]], 1.0, -9999.0).unwrap();
        let scenario = ClassGrid::from_rows(&[vec![1, 1], vec![1, 0]], 1.0, 0).unwrap();
        let out = overlay_density(&precomputed, &base, &scenario, &pools()).unwrap();
        assert_eq!(out.get(0, 0), Some(280.0));
        assert_eq!(out.get(0, 1), Some(310.0));
        assert_eq!(out.get(1, 0), Some(300.0));
        assert_eq!(out.get(1, 1), None);
    }

    #[test]
    fn test_all_zones_keyed_by_name() {
        let d = density(&grid(), &pools()).unwrap();
        let zones = ZoneSet::from_zones([
            Zone::window("top", d.extent(), 0..1, 0..2).unwrap(),
            Zone::all("all", d.extent()),
        ])
        .unwrap();
        let stats = zonal_statistics_all(&d, &zones).unwrap();
        let names: Vec<&str> = stats.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["all", "top"]);
        assert_eq!(stats["top"].total_carbon_mg, 600.0);
    }
}

//! Baseline vs scenario comparison, one entry per zone.
//!
//! Deltas are always `scenario - baseline`; a loss of carbon is negative.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::{self, ZonalStatistics};
use crate::error::Result;
use crate::grid::{ensure_aligned, ClassGrid, DensityGrid};
use crate::pools::PoolTable;
use crate::valuation::{self, FlowAssumption, SequestrationFlow, ValuationParameters};
use crate::zone::{Zone, ZoneSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pricing {
    /// One price for every cell.
    Uniform,
    /// Class price overrides from the pool table applied.
    PerClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequestrationEntry {
    pub assumption: FlowAssumption,
    pub horizon_years: u32,
    pub discount_rate: f64,
    pub flow: SequestrationFlow,
    pub present_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneComparison {
    pub zone: String,
    pub baseline: ZonalStatistics,
    pub scenario: ZonalStatistics,
    pub delta_carbon_mg: f64,
    /// `None` when the baseline holds no carbon.
    pub percent_change: Option<f64>,
    pub baseline_value: f64,
    pub scenario_value: f64,
    pub delta_value: f64,
    pub delta_value_per_ha: Option<f64>,
    /// Stock values held in perpetuity; `None` at a zero discount rate.
    pub baseline_npv: Option<f64>,
    pub scenario_npv: Option<f64>,
    pub delta_npv: Option<f64>,
    pub pricing: Pricing,
    pub sequestration: Option<SequestrationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    #[serde(default)]
    pub scenario: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub parameters: ValuationParameters,
    pub zones: BTreeMap<String, ZoneComparison>,
}

impl ComparisonReport {
    pub fn for_scenario(mut self, name: impl Into<String>) -> Self {
        self.scenario = Some(name.into());
        self
    }

    pub fn get(&self, zone: &str) -> Option<&ZoneComparison> {
        self.zones.get(zone)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One CSV row per zone, in zone-name order.
    pub fn to_csv(&self) -> String {
        let mut out = String::from(
            "zone,baseline_carbon_mg,scenario_carbon_mg,delta_carbon_mg,percent_change,\
             baseline_value,scenario_value,delta_value,baseline_area_ha,scenario_area_ha,\
             baseline_nodata_cells,scenario_nodata_cells,baseline_mean_density,\
             scenario_mean_density,baseline_median_density,scenario_median_density,\
             baseline_npv,scenario_npv,delta_npv,pricing,sequestration_assumption,\
             sequestration_value\n",
        );
        for entry in self.zones.values() {
            let (assumption, present_value) = match &entry.sequestration {
                Some(seq) => (
                    match seq.assumption {
                        FlowAssumption::Linear => "linear",
                        FlowAssumption::Schedule => "schedule",
                    },
                    seq.present_value.to_string(),
                ),
                None => ("", String::new()),
            };
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                csv_field(&entry.zone),
                entry.baseline.total_carbon_mg,
                entry.scenario.total_carbon_mg,
                entry.delta_carbon_mg,
                optional(entry.percent_change),
                entry.baseline_value,
                entry.scenario_value,
                entry.delta_value,
                entry.baseline.area_ha,
                entry.scenario.area_ha,
                entry.baseline.excluded_nodata_count,
                entry.scenario.excluded_nodata_count,
                optional(entry.baseline.mean_density.value()),
                optional(entry.scenario.mean_density.value()),
                optional(entry.baseline.median_density),
                optional(entry.scenario.median_density),
                optional(entry.baseline_npv),
                optional(entry.scenario_npv),
                optional(entry.delta_npv),
                match entry.pricing {
                    Pricing::Uniform => "uniform",
                    Pricing::PerClass => "per_class",
                },
                assumption,
                present_value,
            ));
        }
        out
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// One side of a comparison: a density grid, plus the class grid it came
/// from when per-class prices should apply.
#[derive(Debug, Clone, Copy)]
pub struct CarbonLayer<'a> {
    pub density: &'a DensityGrid,
    pub classes: Option<&'a ClassGrid>,
}

impl<'a> CarbonLayer<'a> {
    pub fn density(density: &'a DensityGrid) -> Self {
        Self {
            density,
            classes: None,
        }
    }

    pub fn classified(density: &'a DensityGrid, classes: &'a ClassGrid) -> Self {
        Self {
            density,
            classes: Some(classes),
        }
    }
}

/// Compare two density grids zone by zone at the run-wide price.
pub fn compare(
    base_density: &DensityGrid,
    scenario_density: &DensityGrid,
    zones: &ZoneSet,
    params: &ValuationParameters,
) -> Result<ComparisonReport> {
    compare_layers(
        CarbonLayer::density(base_density),
        CarbonLayer::density(scenario_density),
        None,
        zones,
        params,
    )
}

/// Compare two class grids, deriving both densities from `pools` and
/// applying any class price overrides.
pub fn compare_classified(
    base_classes: &ClassGrid,
    scenario_classes: &ClassGrid,
    pools: &PoolTable,
    zones: &ZoneSet,
    params: &ValuationParameters,
) -> Result<ComparisonReport> {
    ensure_aligned("baseline vs scenario", base_classes.geometry(), scenario_classes.geometry())?;
    let base_density = aggregate::density(base_classes, pools)?;
    let scenario_density = aggregate::density(scenario_classes, pools)?;
    compare_layers(
        CarbonLayer::classified(&base_density, base_classes),
        CarbonLayer::classified(&scenario_density, scenario_classes),
        Some(pools),
        zones,
        params,
    )
}

/// General form of [`compare`]. Per-class pricing is used when both layers
/// carry classes and `pools` defines at least one price override.
pub fn compare_layers(
    base: CarbonLayer<'_>,
    scenario: CarbonLayer<'_>,
    pools: Option<&PoolTable>,
    zones: &ZoneSet,
    params: &ValuationParameters,
) -> Result<ComparisonReport> {
    params.validate()?;
    ensure_aligned("baseline vs scenario", base.density.geometry(), scenario.density.geometry())?;
    for classes in [base.classes, scenario.classes].into_iter().flatten() {
        ensure_aligned("classes vs density", classes.geometry(), base.density.geometry())?;
    }
    zones.ensure_extent(base.density.extent())?;

    let price_table = match (base.classes, scenario.classes, pools) {
        (Some(_), Some(_), Some(pools)) if pools.has_price_overrides() => Some(pools),
        _ => None,
    };

    let zones: BTreeMap<String, ZoneComparison> = zones
        .as_slice()
        .par_iter()
        .map(|zone| {
            let entry = compare_zone(zone, base, scenario, price_table, params)?;
            Ok((zone.name().to_string(), entry))
        })
        .collect::<Result<_>>()?;

    let delta: f64 = zones.values().map(|z| z.delta_carbon_mg).sum();
    info!(zones = zones.len(), delta_carbon_mg = delta, "comparison report built");
    Ok(ComparisonReport {
        scenario: None,
        generated_at: Utc::now(),
        parameters: params.clone(),
        zones,
    })
}

fn layer_value(
    layer: CarbonLayer<'_>,
    zone: &Zone,
    stats: &ZonalStatistics,
    price_table: Option<&PoolTable>,
    params: &ValuationParameters,
) -> Result<f64> {
    match (price_table, layer.classes) {
        (Some(pools), Some(classes)) => {
            let split = aggregate::zonal_statistics_by_class(classes, layer.density, zone)?;
            let classified: f64 = split
                .classes
                .iter()
                .map(|(code, class_stats)| {
                    let price = pools.price_override(*code).unwrap_or(params.price);
                    valuation::value_at(class_stats.total_carbon_mg, price, params)
                })
                .sum();
            Ok(classified + valuation::value_of(split.unclassified.total_carbon_mg, params))
        }
        _ => Ok(valuation::value_of(stats.total_carbon_mg, params)),
    }
}

fn compare_zone(
    zone: &Zone,
    base: CarbonLayer<'_>,
    scenario: CarbonLayer<'_>,
    price_table: Option<&PoolTable>,
    params: &ValuationParameters,
) -> Result<ZoneComparison> {
    let baseline = aggregate::zonal_statistics(base.density, zone)?;
    let scenario_stats = aggregate::zonal_statistics(scenario.density, zone)?;

    let baseline_value = layer_value(base, zone, &baseline, price_table, params)?;
    let scenario_value = layer_value(scenario, zone, &scenario_stats, price_table, params)?;
    let delta_carbon_mg = scenario_stats.total_carbon_mg - baseline.total_carbon_mg;
    let delta_value = scenario_value - baseline_value;

    let percent_change = (baseline.total_carbon_mg != 0.0)
        .then(|| delta_carbon_mg / baseline.total_carbon_mg * 100.0);
    let delta_value_per_ha = (baseline.area_ha > 0.0).then(|| delta_value / baseline.area_ha);
    let baseline_npv = valuation::perpetuity_value(baseline_value, params);
    let scenario_npv = valuation::perpetuity_value(scenario_value, params);
    let delta_npv = baseline_npv.zip(scenario_npv).map(|(base, scen)| scen - base);

    let sequestration = match params.horizon_years {
        Some(horizon_years) => {
            let flow = SequestrationFlow::for_delta(delta_carbon_mg, params)?;
            let present_value = valuation::sequestration_value(&flow, params)?;
            Some(SequestrationEntry {
                assumption: flow.assumption(),
                horizon_years,
                discount_rate: params.discount_rate,
                flow,
                present_value,
            })
        }
        None => None,
    };

    Ok(ZoneComparison {
        zone: zone.name().to_string(),
        baseline,
        scenario: scenario_stats,
        delta_carbon_mg,
        percent_change,
        baseline_value,
        scenario_value,
        delta_value,
        delta_value_per_ha,
        baseline_npv,
        scenario_npv,
        delta_npv,
        pricing: if price_table.is_some() {
            Pricing::PerClass
        } else {
            Pricing::Uniform
        },
        sequestration,
    })
}

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::info;

use crate::aggregate::{self, ZonalStatistics};
use crate::error::{CarbonError, Result};
use crate::grid::{ensure_aligned, ClassGrid, DensityGrid};
use crate::output::{ReportWriter, WrittenFiles};
use crate::pools::PoolTable;
use crate::report::{self, CarbonLayer, ComparisonReport};
use crate::scenario::{self, Scenario, ScenarioOutcome};
use crate::valuation::ValuationParameters;
use crate::zone::{Zone, ZoneSet};

/// The landscape every scenario is compared against.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub classes: ClassGrid,
    pub pools: PoolTable,
    /// Precomputed density replacing the pool-table density for the baseline.
    pub density: Option<DensityGrid>,
}

impl Baseline {
    pub fn classified(classes: ClassGrid, pools: PoolTable) -> Self {
        Self {
            classes,
            pools,
            density: None,
        }
    }

    pub fn with_density(mut self, density: DensityGrid) -> Self {
        self.density = Some(density);
        self
    }

    fn validate(&self) -> Result<()> {
        self.classes.validate_against(&self.pools)?;
        if let Some(density) = &self.density {
            ensure_aligned("precomputed density vs land cover", density.geometry(), self.classes.geometry())?;
        }
        Ok(())
    }

    fn density_grid(&self) -> Result<DensityGrid> {
        match &self.density {
            Some(density) => Ok(density.clone()),
            None => aggregate::density(&self.classes, &self.pools),
        }
    }

    fn scenario_density(&self, base_density: &DensityGrid, scenario: &ClassGrid) -> Result<DensityGrid> {
        match &self.density {
            Some(_) => aggregate::overlay_density(base_density, &self.classes, scenario, &self.pools),
            None => aggregate::density(scenario, &self.pools),
        }
    }
}

pub struct EngineSettings {
    pub run_name: String,
    pub valuation: ValuationParameters,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    zones: Vec<Zone>,
    scenarios: Vec<Scenario>,
    writer: Option<ReportWriter>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            zones: Vec::new(),
            scenarios: Vec::new(),
            writer: None,
        }
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zones.push(zone);
        self
    }

    pub fn with_zones(mut self, zones: ZoneSet) -> Self {
        self.zones.extend(zones.iter().cloned());
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_scenarios(mut self, scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        self.scenarios.extend(scenarios);
        self
    }

    pub fn with_writer(mut self, writer: ReportWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.settings.valuation.validate()?;
        let zones = ZoneSet::from_zones(self.zones)?;
        let mut seen = BTreeSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(CarbonError::config(format!(
                    "scenario '{}' defined more than once",
                    scenario.name
                )));
            }
        }
        if let Some(writer) = &self.writer {
            writer.check_scenario_names(self.scenarios.iter().map(|s| s.name.as_str()))?;
        }
        Ok(Engine {
            settings: self.settings,
            zones,
            scenarios: self.scenarios,
            writer: self.writer,
        })
    }
}

pub struct Engine {
    settings: EngineSettings,
    zones: ZoneSet,
    scenarios: Vec<Scenario>,
    writer: Option<ReportWriter>,
}

#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub outcome: ScenarioOutcome,
    pub report: ComparisonReport,
    pub files: Option<WrittenFiles>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_name: String,
    pub baseline: BTreeMap<String, ZonalStatistics>,
    pub scenarios: Vec<ScenarioResult>,
}

impl RunSummary {
    pub fn scenario(&self, name: &str) -> Option<&ScenarioResult> {
        self.scenarios.iter().find(|r| r.outcome.scenario == name)
    }
}

impl Engine {
    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Evaluate every scenario against `baseline`. Inputs and every scenario
    /// grid are validated before any aggregation starts; scenarios are then
    /// evaluated in parallel.
    pub fn run(&self, baseline: &Baseline) -> Result<RunSummary> {
        baseline.validate()?;
        self.zones.ensure_extent(baseline.classes.extent())?;

        let outcomes = scenario::apply_scenarios(&baseline.classes, &self.scenarios, &self.zones)?;
        for outcome in &outcomes {
            outcome.grid.validate_against(&baseline.pools)?;
        }

        let base_density = baseline.density_grid()?;
        let baseline_stats = aggregate::zonal_statistics_all(&base_density, &self.zones)?;
        for (zone, stats) in &baseline_stats {
            info!(
                zone = %zone,
                area_ha = stats.area_ha,
                total_carbon_mg = stats.total_carbon_mg,
                "baseline carbon"
            );
        }

        let evaluated = outcomes
            .into_par_iter()
            .map(|outcome| {
                let density = baseline.scenario_density(&base_density, &outcome.grid)?;
                let report = report::compare_layers(
                    CarbonLayer::classified(&base_density, &baseline.classes),
                    CarbonLayer::classified(&density, &outcome.grid),
                    Some(&baseline.pools),
                    &self.zones,
                    &self.settings.valuation,
                )?
                .for_scenario(outcome.scenario.clone());
                Ok((outcome, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let run_name = &self.settings.run_name;
        if let Some(writer) = &self.writer {
            writer.write_baseline(run_name, &baseline_stats)?;
        }
        let mut scenarios = Vec::with_capacity(evaluated.len());
        for (outcome, report) in evaluated {
            let files = match &self.writer {
                Some(writer) => Some(writer.write(run_name, &outcome, &report)?),
                None => None,
            };
            scenarios.push(ScenarioResult {
                outcome,
                report,
                files,
            });
        }

        info!(run = %run_name, scenarios = scenarios.len(), "run complete");
        Ok(RunSummary {
            run_name: run_name.clone(),
            baseline: baseline_stats,
            scenarios,
        })
    }
}

//! Counterfactual land cover: class reassignment rules scoped to zones.
//!
//! Rules run in list order and each one tests `from` against the cell's
//! current value, so a later rule sees what earlier rules wrote. The base
//! grid is never touched; every application returns a new grid.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CarbonError, Result};
use crate::grid::ClassGrid;
use crate::zone::{Zone, ZoneSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentRule {
    pub zone: String,
    /// Only cells currently holding this class are rewritten; every valid
    /// cell in the zone when absent.
    #[serde(default, rename = "from")]
    pub from_class: Option<i32>,
    #[serde(rename = "to")]
    pub to_class: i32,
}

impl ReassignmentRule {
    pub fn all(zone: impl Into<String>, to_class: i32) -> Self {
        Self {
            zone: zone.into(),
            from_class: None,
            to_class,
        }
    }

    pub fn from_class(zone: impl Into<String>, from_class: i32, to_class: i32) -> Self {
        Self {
            zone: zone.into(),
            from_class: Some(from_class),
            to_class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<ReassignmentRule>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: ReassignmentRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Resolve every rule's zone against `grid` before any cell is rewritten.
    pub fn validate<'z>(&self, grid: &ClassGrid, zones: &'z ZoneSet) -> Result<Vec<&'z Zone>> {
        self.rules
            .iter()
            .map(|rule| {
                let zone = zones.get(&rule.zone)?;
                zone.ensure_extent(grid.extent())?;
                if grid.is_nodata(rule.to_class) {
                    return Err(CarbonError::config(format!(
                        "scenario '{}': rule on zone '{}' assigns the nodata code {}",
                        self.name, rule.zone, rule.to_class
                    )));
                }
                if rule.from_class.is_some_and(|from| grid.is_nodata(from)) {
                    return Err(CarbonError::config(format!(
                        "scenario '{}': rule on zone '{}' selects the nodata code",
                        self.name, rule.zone
                    )));
                }
                Ok(zone)
            })
            .collect()
    }
}

/// What one rule did to the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    pub zone: String,
    pub from_class: Option<i32>,
    pub to_class: i32,
    /// Cells whose value this rule changed.
    pub cells_changed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub grid: ClassGrid,
    pub changes: Vec<RuleChange>,
}

impl ScenarioOutcome {
    /// Cells that differ from the base grid after all rules ran.
    pub fn cells_differing_from(&self, base: &ClassGrid) -> usize {
        self.grid
            .cells()
            .iter()
            .zip(base.cells())
            .filter(|(a, b)| a != b)
            .count()
    }
}

/// Apply a scenario's rules, in order, to a copy of `base`.
pub fn apply_scenario(base: &ClassGrid, scenario: &Scenario, zones: &ZoneSet) -> Result<ScenarioOutcome> {
    let resolved = scenario.validate(base, zones)?;
    let mut cells = base.cells().to_vec();
    let mut changes = Vec::with_capacity(scenario.rules.len());

    for (rule, zone) in scenario.rules.iter().zip(resolved) {
        let mut changed = 0;
        for (cell, _) in cells
            .iter_mut()
            .zip(zone.mask())
            .filter(|(_, inside)| **inside)
        {
            if base.is_nodata(*cell) {
                continue;
            }
            if rule.from_class.map_or(true, |from| *cell == from) && *cell != rule.to_class {
                *cell = rule.to_class;
                changed += 1;
            }
        }
        debug!(
            scenario = %scenario.name,
            zone = %rule.zone,
            from = ?rule.from_class,
            to = rule.to_class,
            changed,
            "rule applied"
        );
        changes.push(RuleChange {
            zone: rule.zone.clone(),
            from_class: rule.from_class,
            to_class: rule.to_class,
            cells_changed: changed,
        });
    }

    let outcome = ScenarioOutcome {
        scenario: scenario.name.clone(),
        grid: base.with_cells(cells),
        changes,
    };
    info!(
        scenario = %scenario.name,
        rules = scenario.rules.len(),
        cells_changed = outcome.cells_differing_from(base),
        "scenario applied"
    );
    Ok(outcome)
}

/// Apply independent scenarios to the same base grid in parallel. Every
/// scenario is validated before any is applied.
pub fn apply_scenarios(
    base: &ClassGrid,
    scenarios: &[Scenario],
    zones: &ZoneSet,
) -> Result<Vec<ScenarioOutcome>> {
    for scenario in scenarios {
        scenario.validate(base, zones)?;
    }
    scenarios
        .par_iter()
        .map(|scenario| apply_scenario(base, scenario, zones))
        .collect()
}

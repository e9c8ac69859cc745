pub mod aggregate;
pub mod ascii;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod logging;
pub mod output;
pub mod pools;
pub mod report;
pub mod scenario;
pub mod valuation;
pub mod zone;

pub use aggregate::{density, zonal_statistics, MeanDensity, ZonalStatistics};
pub use engine::{Baseline, Engine, EngineBuilder, EngineSettings, RunSummary};
pub use error::{CarbonError, Result};
pub use grid::{ClassGrid, DensityGrid, GridExtent};
pub use pools::{CarbonPools, LandCoverClass, PoolTable};
pub use report::{compare, compare_classified, ComparisonReport, ZoneComparison};
pub use scenario::{apply_scenario, ReassignmentRule, Scenario};
pub use valuation::{sequestration_value, value_of, PriceUnit, SequestrationFlow, ValuationParameters};
pub use zone::{Zone, ZoneSet};

//! YAML run files: where the inputs live, which zones and scenarios to
//! evaluate, and how to value the result.
//!
//! Paths in a run file are relative to the run file's own directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::ascii::{self, AsciiHeader};
use crate::engine::Baseline;
use crate::grid::ClassGrid;
use crate::pools::PoolTable;
use crate::scenario::Scenario;
use crate::valuation::ValuationParameters;
use crate::zone::{Zone, ZoneSet};

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_write_grids() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub land_cover: LandCoverSource,
    pub pool_table: PathBuf,
    /// Precomputed density raster used as the baseline density.
    #[serde(default)]
    pub density: Option<PathBuf>,
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    pub valuation: ValuationParameters,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LandCoverSource {
    pub path: PathBuf,
    /// Cell area in hectares, overriding the one derived from `cellsize`.
    #[serde(default)]
    pub cell_size_ha: Option<f64>,
    #[serde(default)]
    pub reclassify: BTreeMap<i32, i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(flatten)]
    pub source: ZoneSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    All(bool),
    Mask(PathBuf),
    Classes(Vec<i32>),
    Window(WindowSpec),
    Buffer(BufferSpec),
    Difference(DifferenceSpec),
    Union(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowSpec {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferSpec {
    pub around: String,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub cells: Option<usize>,
    #[serde(default)]
    pub include_source: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DifferenceSpec {
    pub of: String,
    pub minus: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_write_grids")]
    pub write_scenario_grids: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            write_scenario_grids: default_write_grids(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub struct RunLoader {
    base_dir: PathBuf,
}

impl RunLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<RunConfig> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        let mut run: RunConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        run.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(run)
    }
}

/// Inputs read from disk and ready for the engine.
pub struct LoadedRun {
    pub header: AsciiHeader,
    pub baseline: Baseline,
    pub zones: ZoneSet,
}

impl RunConfig {
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.dir)
    }

    /// Read the land cover, pool table, optional density and zone masks.
    pub fn load_inputs(&self) -> Result<LoadedRun> {
        let lulc_path = self.resolve_path(&self.land_cover.path);
        let (header, classes) = ascii::read_class_grid(&lulc_path, self.land_cover.cell_size_ha)
            .with_context(|| format!("Failed to load land cover {}", lulc_path.display()))?;
        let classes = if self.land_cover.reclassify.is_empty() {
            classes
        } else {
            classes.reclassify(&self.land_cover.reclassify)?
        };
        info!(
            path = %lulc_path.display(),
            extent = %classes.extent(),
            cell_size_ha = classes.cell_size_ha(),
            classes = classes.class_counts().len(),
            "land cover loaded"
        );

        let pools = self.load_pools()?;
        let mut baseline = Baseline::classified(classes, pools);
        if let Some(density) = &self.density {
            let density_path = self.resolve_path(density);
            let (_, grid) = ascii::read_density_grid(&density_path, self.land_cover.cell_size_ha)
                .with_context(|| format!("Failed to load density {}", density_path.display()))?;
            info!(path = %density_path.display(), "precomputed density loaded");
            baseline = baseline.with_density(grid);
        }

        let zones = self.build_zones(&header, &baseline.classes)?;
        Ok(LoadedRun {
            header,
            baseline,
            zones,
        })
    }

    fn load_pools(&self) -> Result<PoolTable> {
        let path = self.resolve_path(&self.pool_table);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read pool table {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let table = if is_yaml {
            PoolTable::from_yaml_str(&text)
        } else {
            PoolTable::from_csv_str(&text)
        }
        .with_context(|| format!("Failed to parse pool table {}", path.display()))?;
        info!(path = %path.display(), classes = table.len(), "pool table loaded");
        Ok(table)
    }

    fn build_zones(&self, header: &AsciiHeader, classes: &ClassGrid) -> Result<ZoneSet> {
        let extent = classes.extent();
        let mut zones = ZoneSet::new();
        for config in &self.zones {
            let name = config.name.clone();
            let zone = match &config.source {
                ZoneSource::All(true) => Zone::all(name, extent),
                ZoneSource::All(false) => bail!("zone '{name}': 'all: false' selects nothing"),
                ZoneSource::Mask(path) => {
                    let path = self.resolve_path(path);
                    let (_, mask) = ascii::read_class_grid(&path, Some(classes.cell_size_ha()))
                        .with_context(|| format!("Failed to load zone mask {}", path.display()))?;
                    Zone::from_indicator(name, &mask)
                }
                ZoneSource::Classes(codes) => Zone::from_classes(name, classes, codes),
                ZoneSource::Window(w) => {
                    Zone::window(name, extent, w.row_start..w.row_end, w.col_start..w.col_end)?
                }
                ZoneSource::Buffer(opts) => {
                    let cells = buffer_cells(&name, opts, header)?;
                    zones.get(&opts.around)?.buffer(name, cells, opts.include_source)
                }
                ZoneSource::Difference(opts) => {
                    zones.get(&opts.of)?.difference(zones.get(&opts.minus)?, name)?
                }
                ZoneSource::Union(members) => {
                    let Some((first, rest)) = members.split_first() else {
                        bail!("zone '{name}': union needs at least one member");
                    };
                    let mut zone = zones.get(first)?.clone().renamed(name);
                    for member in rest {
                        zone = zone.union(zones.get(member)?, config.name.clone())?;
                    }
                    zone
                }
            };
            zone.ensure_extent(extent)?;
            info!(zone = zone.name(), cells = zone.cell_count(), "zone defined");
            zones.insert(zone)?;
        }
        Ok(zones)
    }
}

fn buffer_cells(name: &str, opts: &BufferSpec, header: &AsciiHeader) -> Result<usize> {
    match (opts.cells, opts.distance_m) {
        (Some(cells), None) => Ok(cells),
        (None, Some(distance)) => {
            if !distance.is_finite() || distance < 0.0 {
                bail!("zone '{name}': buffer distance must be non-negative, got {distance}");
            }
            if !(header.cell_size > 0.0) {
                bail!("zone '{name}': buffer distance needs a positive grid cellsize");
            }
            Ok((distance / header.cell_size).ceil() as usize)
        }
        _ => bail!("zone '{name}': buffer needs exactly one of 'cells' or 'distance_m'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_sources_parse() {
        let text = r#"
name: test
land_cover: { path: lulc.asc }
pool_table: pools.csv
zones:
  - name: landscape
    all: true
  - name: mine
    classes: [7]
  - name: buffer
    buffer: { around: mine, distance_m: 1000 }
  - name: corner
    window: { row_start: 0, row_end: 1, col_start: 0, col_end: 1 }
scenarios:
  - name: restore
    rules:
      - { zone: buffer, from: 7, to: 1 }
      - { zone: mine, to: 2 }
valuation:
  price: 40
  price_unit: per_mg_c
"#;
        let run: RunConfig = serde_yaml::from_str(text).unwrap();
        assert_eq!(run.zones.len(), 4);
        assert!(matches!(run.zones[0].source, ZoneSource::All(true)));
        assert!(matches!(run.zones[2].source, ZoneSource::Buffer(_)));
        assert_eq!(run.scenarios[0].rules[0].from_class, Some(7));
        assert_eq!(run.scenarios[0].rules[1].from_class, None);
        assert_eq!(run.output.dir, PathBuf::from("reports"));
        assert_eq!(run.logging.level, "info");
    }

    #[test]
    fn test_buffer_distance_in_cells() {
        let header = AsciiHeader::for_extent(crate::grid::GridExtent::new(1, 1), 0.09, -9999.0);
        let opts = BufferSpec {
            around: "mine".into(),
            distance_m: Some(1000.0),
            cells: None,
            include_source: false,
        };
        assert_eq!(buffer_cells("b", &opts, &header).unwrap(), 34);
        let both = BufferSpec {
            cells: Some(2),
            ..opts
        };
        assert!(buffer_cells("b", &both, &header).is_err());
    }
}

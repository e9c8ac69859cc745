//! Writes comparison reports and scenario land cover to disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::aggregate::ZonalStatistics;
use crate::ascii::{self, AsciiHeader};
use crate::error::{CarbonError, Result};
use crate::report::ComparisonReport;
use crate::scenario::ScenarioOutcome;

const BASELINE_STEM: &str = "baseline";

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub grid: Option<PathBuf>,
}

/// Lays files out as `<dir>/<run>/<scenario>.{json,csv}` plus
/// `<scenario>_lulc.asc` when a grid header is attached.
pub struct ReportWriter {
    output_dir: PathBuf,
    grid_header: Option<AsciiHeader>,
}

impl ReportWriter {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            grid_header: None,
        }
    }

    /// Also write each scenario's land cover, georeferenced with `header`.
    pub fn with_scenario_grids(mut self, header: AsciiHeader) -> Self {
        self.grid_header = Some(header);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Every scenario must map to its own file stem, distinct from the
    /// baseline file.
    pub fn check_scenario_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut stems: BTreeMap<String, &str> = BTreeMap::new();
        for name in names {
            let stem = file_stem(name);
            if stem == BASELINE_STEM {
                return Err(CarbonError::config(format!(
                    "scenario '{name}' would overwrite the baseline report"
                )));
            }
            if let Some(other) = stems.insert(stem.clone(), name) {
                return Err(CarbonError::config(format!(
                    "scenarios '{other}' and '{name}' both write to '{stem}' files"
                )));
            }
        }
        Ok(())
    }

    fn run_dir(&self, run_name: &str) -> Result<PathBuf> {
        let dir = self.output_dir.join(file_stem(run_name));
        fs::create_dir_all(&dir).map_err(|source| CarbonError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn write_baseline(
        &self,
        run_name: &str,
        stats: &BTreeMap<String, ZonalStatistics>,
    ) -> Result<PathBuf> {
        let path = self.run_dir(run_name)?.join(format!("{BASELINE_STEM}.json"));
        write_file(&path, &to_json(stats, &path)?)?;
        info!(path = %path.display(), "baseline statistics written");
        Ok(path)
    }

    pub fn write(
        &self,
        run_name: &str,
        outcome: &ScenarioOutcome,
        report: &ComparisonReport,
    ) -> Result<WrittenFiles> {
        let dir = self.run_dir(run_name)?;
        let stem = file_stem(&outcome.scenario);

        let json = dir.join(format!("{stem}.json"));
        write_file(&json, &to_json(report, &json)?)?;

        let csv = dir.join(format!("{stem}.csv"));
        write_file(&csv, &report.to_csv())?;

        let grid = match &self.grid_header {
            Some(header) => {
                let path = dir.join(format!("{stem}_lulc.asc"));
                ascii::write_class_grid(&path, &outcome.grid, header)?;
                Some(path)
            }
            None => None,
        };

        info!(scenario = %outcome.scenario, dir = %dir.display(), "report written");
        Ok(WrittenFiles { json, csv, grid })
    }
}

fn to_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| CarbonError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|source| CarbonError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Scenario and run names as safe file names.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

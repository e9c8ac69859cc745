//! ESRI ASCII grid (`.asc`) reading and writing.
//!
//! The header's `cellsize` is taken to be in metres, giving a cell area of
//! `cellsize² / 10 000` ha. Grids in geographic coordinates need an explicit
//! cell area instead.

use std::fs;
use std::path::Path;

use crate::error::{CarbonError, Result};
use crate::grid::{ClassGrid, DensityGrid, GridExtent};

const SQUARE_METRES_PER_HA: f64 = 10_000.0;
const DEFAULT_NODATA: f64 = -9999.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AsciiHeader {
    pub cols: usize,
    pub rows: usize,
    pub xll: f64,
    pub yll: f64,
    /// `true` when the origin is given as `xllcenter`/`yllcenter`.
    pub center_origin: bool,
    pub cell_size: f64,
    pub nodata: f64,
}

impl AsciiHeader {
    pub fn extent(&self) -> GridExtent {
        GridExtent::new(self.rows, self.cols)
    }

    pub fn cell_area_ha(&self) -> f64 {
        self.cell_size * self.cell_size / SQUARE_METRES_PER_HA
    }

    /// Header for a grid with no georeferencing beyond its cell area.
    pub fn for_extent(extent: GridExtent, cell_area_ha: f64, nodata: f64) -> Self {
        Self {
            cols: extent.cols,
            rows: extent.rows,
            xll: 0.0,
            yll: 0.0,
            center_origin: false,
            cell_size: (cell_area_ha * SQUARE_METRES_PER_HA).sqrt(),
            nodata,
        }
    }
}

struct Parsed<'a> {
    header: AsciiHeader,
    values: Vec<(usize, &'a str)>,
}

fn parse(text: &str) -> Result<Parsed<'_>> {
    let mut cols = None;
    let mut rows = None;
    let mut xll = 0.0;
    let mut yll = 0.0;
    let mut center_origin = false;
    let mut cell_size = None;
    let mut nodata = DEFAULT_NODATA;
    let mut values = Vec::new();
    let mut in_body = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let starts_alpha = trimmed.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        if !in_body && starts_alpha {
            let mut parts = trimmed.split_whitespace();
            let key = parts.next().unwrap_or_default().to_ascii_lowercase();
            let value = parts
                .next()
                .ok_or_else(|| CarbonError::parse(line_no, format!("header '{key}' has no value")))?;
            let number = value
                .parse::<f64>()
                .map_err(|_| CarbonError::parse(line_no, format!("invalid number '{value}' for '{key}'")))?;
            match key.as_str() {
                "ncols" => cols = Some(parse_count(value, line_no)?),
                "nrows" => rows = Some(parse_count(value, line_no)?),
                "xllcorner" => xll = number,
                "yllcorner" => yll = number,
                "xllcenter" => {
                    xll = number;
                    center_origin = true;
                }
                "yllcenter" => {
                    yll = number;
                    center_origin = true;
                }
                "cellsize" => cell_size = Some(number),
                "nodata_value" => nodata = number,
                other => {
                    return Err(CarbonError::parse(line_no, format!("unknown header key '{other}'")));
                }
            }
            continue;
        }
        in_body = true;
        values.extend(trimmed.split_whitespace().map(|token| (line_no, token)));
    }

    let header = AsciiHeader {
        cols: cols.ok_or_else(|| CarbonError::parse(1, "missing ncols"))?,
        rows: rows.ok_or_else(|| CarbonError::parse(1, "missing nrows"))?,
        xll,
        yll,
        center_origin,
        cell_size: cell_size.ok_or_else(|| CarbonError::parse(1, "missing cellsize"))?,
        nodata,
    };
    if values.len() != header.rows * header.cols {
        return Err(CarbonError::GridMismatch(format!(
            "ascii grid declares {}x{} but holds {} values",
            header.rows,
            header.cols,
            values.len()
        )));
    }
    Ok(Parsed { header, values })
}

fn parse_count(value: &str, line: usize) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| CarbonError::parse(line, format!("invalid count '{value}'")))
}

fn area(header: &AsciiHeader, cell_size_ha: Option<f64>) -> f64 {
    cell_size_ha.unwrap_or_else(|| header.cell_area_ha())
}

/// Parse a categorical grid. Values and the nodata code must be integers.
pub fn parse_class_grid(text: &str, cell_size_ha: Option<f64>) -> Result<(AsciiHeader, ClassGrid)> {
    let Parsed { header, values } = parse(text)?;
    let nodata = integral(header.nodata)
        .ok_or_else(|| CarbonError::parse(1, format!("class grid nodata {} is not an integer", header.nodata)))?;
    let cells = values
        .into_iter()
        .map(|(line, token)| {
            token
                .parse::<i32>()
                .map_err(|_| CarbonError::parse(line, format!("invalid class code '{token}'")))
        })
        .collect::<Result<Vec<i32>>>()?;
    let grid = ClassGrid::new(header.extent(), area(&header, cell_size_ha), nodata, cells)?;
    Ok((header, grid))
}

/// Parse a density grid in Mg C/ha.
pub fn parse_density_grid(text: &str, cell_size_ha: Option<f64>) -> Result<(AsciiHeader, DensityGrid)> {
    let Parsed { header, values } = parse(text)?;
    let cells = values
        .into_iter()
        .map(|(line, token)| {
            token
                .parse::<f64>()
                .map_err(|_| CarbonError::parse(line, format!("invalid density '{token}'")))
        })
        .collect::<Result<Vec<f64>>>()?;
    let grid = DensityGrid::new(header.extent(), area(&header, cell_size_ha), header.nodata, cells)?;
    Ok((header, grid))
}

fn integral(value: f64) -> Option<i32> {
    let rounded = value.round();
    (rounded == value && rounded >= f64::from(i32::MIN) && rounded <= f64::from(i32::MAX))
        .then_some(rounded as i32)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CarbonError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_class_grid(path: impl AsRef<Path>, cell_size_ha: Option<f64>) -> Result<(AsciiHeader, ClassGrid)> {
    parse_class_grid(&read(path.as_ref())?, cell_size_ha)
}

pub fn read_density_grid(path: impl AsRef<Path>, cell_size_ha: Option<f64>) -> Result<(AsciiHeader, DensityGrid)> {
    parse_density_grid(&read(path.as_ref())?, cell_size_ha)
}

fn write_header(out: &mut String, header: &AsciiHeader, nodata: &str) {
    let (x_key, y_key) = if header.center_origin {
        ("xllcenter", "yllcenter")
    } else {
        ("xllcorner", "yllcorner")
    };
    out.push_str(&format!("ncols {}\n", header.cols));
    out.push_str(&format!("nrows {}\n", header.rows));
    out.push_str(&format!("{x_key} {}\n", header.xll));
    out.push_str(&format!("{y_key} {}\n", header.yll));
    out.push_str(&format!("cellsize {}\n", header.cell_size));
    out.push_str(&format!("NODATA_value {nodata}\n"));
}

/// Render a class grid using `header` for georeferencing; extent and nodata
/// come from the grid.
pub fn format_class_grid(grid: &ClassGrid, header: &AsciiHeader) -> String {
    let extent = grid.extent();
    let header = AsciiHeader {
        cols: extent.cols,
        rows: extent.rows,
        ..header.clone()
    };
    let mut out = String::new();
    write_header(&mut out, &header, &grid.nodata().to_string());
    for row in grid.cells().chunks(extent.cols.max(1)) {
        let line: Vec<String> = row.iter().map(i32::to_string).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

pub fn write_class_grid(path: impl AsRef<Path>, grid: &ClassGrid, header: &AsciiHeader) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, format_class_grid(grid, header)).map_err(|source| CarbonError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LULC: &str = "\
ncols 2
nrows 2
xllcorner 500000
yllcorner 9500000
cellsize 100
NODATA_value 0
1 1
2 0
";

    #[test]
    fn test_parse_class_grid() {
        let (header, grid) = parse_class_grid(LULC, None).unwrap();
        assert_eq!(header.cell_area_ha(), 1.0);
        assert_eq!(grid.cell_size_ha(), 1.0);
        assert_eq!(grid.nodata(), 0);
        assert_eq!(grid.to_rows(), vec![vec![1, 1], vec![2, 0]]);
    }

    #[test]
    fn test_cell_size_override() {
        let (_, grid) = parse_class_grid(LULC, Some(0.09)).unwrap();
        assert_eq!(grid.cell_size_ha(), 0.09);
    }

    #[test]
    fn test_value_count_must_match() {
        let text = "ncols 2\nnrows 2\ncellsize 30\n1 1 1\n";
        assert!(matches!(parse_class_grid(text, None), Err(CarbonError::GridMismatch(_))));
    }

    #[test]
    fn test_bad_token_reports_line() {
        let text = "ncols 2\nnrows 1\ncellsize 30\n1 x\n";
        match parse_class_grid(text, None).unwrap_err() {
            CarbonError::Parse { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_density_grid_nodata() {
        let text = "ncols 3\nnrows 1\ncellsize 100\nNODATA_value -9999\n12.5 -9999 0\n";
        let (_, grid) = parse_density_grid(text, None).unwrap();
        assert_eq!(grid.value(0), Some(12.5));
        assert_eq!(grid.value(1), None);
        assert_eq!(grid.value(2), Some(0.0));
    }

    #[test]
    fn test_format_keeps_georeference() {
        let (header, grid) = parse_class_grid(LULC, None).unwrap();
        let text = format_class_grid(&grid, &header);
        assert!(text.contains("xllcorner 500000"));
        assert!(text.contains("NODATA_value 0"));
        let (_, again) = parse_class_grid(&text, None).unwrap();
        assert_eq!(again, grid);
    }
}

//! Raster grids: categorical land cover and the derived carbon density.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CarbonError, Result};
use crate::pools::PoolTable;

/// Number of grid rows processed per tile by the streaming passes.
pub const TILE_ROWS: usize = 256;

/// Row/column count of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridExtent {
    pub rows: usize,
    pub cols: usize,
}

impl GridExtent {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Convert a row/column position to a flat cell index.
    pub fn index(&self, row: usize, col: usize) -> Option<usize> {
        if row < self.rows && col < self.cols {
            Some(row * self.cols + col)
        } else {
            None
        }
    }

    /// Convert a flat cell index to a row/column position.
    pub fn position(&self, index: usize) -> Option<(usize, usize)> {
        if index < self.cell_count() {
            Some((index / self.cols, index % self.cols))
        } else {
            None
        }
    }

    /// Cells per tile of [`TILE_ROWS`] rows.
    pub fn tile_len(&self) -> usize {
        (TILE_ROWS * self.cols).max(1)
    }
}

impl fmt::Display for GridExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

fn check_cell_size(cell_size_ha: f64) -> Result<()> {
    if !cell_size_ha.is_finite() || cell_size_ha <= 0.0 {
        return Err(CarbonError::config(format!(
            "cell size must be a positive number of hectares, got {cell_size_ha}"
        )));
    }
    Ok(())
}

fn check_len(extent: GridExtent, len: usize) -> Result<()> {
    if extent.cell_count() != len {
        return Err(CarbonError::GridMismatch(format!(
            "extent {extent} needs {} cells, got {len}",
            extent.cell_count()
        )));
    }
    Ok(())
}

fn same_cell_size(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs())
}

/// Fails with [`CarbonError::GridMismatch`] unless both geometries are identical.
pub fn ensure_aligned(
    what: &str,
    left: (GridExtent, f64),
    right: (GridExtent, f64),
) -> Result<()> {
    if left.0 != right.0 {
        return Err(CarbonError::GridMismatch(format!(
            "{what}: extent {} differs from {}",
            left.0, right.0
        )));
    }
    if !same_cell_size(left.1, right.1) {
        return Err(CarbonError::GridMismatch(format!(
            "{what}: cell size {} ha differs from {} ha",
            left.1, right.1
        )));
    }
    Ok(())
}

/// Categorical land-cover raster, one class code per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassGrid {
    extent: GridExtent,
    cell_size_ha: f64,
    nodata: i32,
    cells: Vec<i32>,
}

impl ClassGrid {
    pub fn new(extent: GridExtent, cell_size_ha: f64, nodata: i32, cells: Vec<i32>) -> Result<Self> {
        check_cell_size(cell_size_ha)?;
        check_len(extent, cells.len())?;
        Ok(Self {
            extent,
            cell_size_ha,
            nodata,
            cells,
        })
    }

    /// Build a grid from row vectors; every row must have the same length.
    pub fn from_rows(rows: &[Vec<i32>], cell_size_ha: f64, nodata: i32) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|row| row.len() != cols) {
            return Err(CarbonError::GridMismatch(format!(
                "row {bad} has {} columns, expected {cols}",
                rows[bad].len()
            )));
        }
        let cells = rows.iter().flatten().copied().collect();
        Self::new(GridExtent::new(rows.len(), cols), cell_size_ha, nodata, cells)
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    pub fn cell_size_ha(&self) -> f64 {
        self.cell_size_ha
    }

    pub fn nodata(&self) -> i32 {
        self.nodata
    }

    pub fn cells(&self) -> &[i32] {
        &self.cells
    }

    pub fn geometry(&self) -> (GridExtent, f64) {
        (self.extent, self.cell_size_ha)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i32> {
        self.extent.index(row, col).map(|idx| self.cells[idx])
    }

    pub fn is_nodata(&self, code: i32) -> bool {
        code == self.nodata
    }

    /// Rows as owned vectors, mostly for assertions and debugging output.
    pub fn to_rows(&self) -> Vec<Vec<i32>> {
        if self.extent.cols == 0 {
            return vec![Vec::new(); self.extent.rows];
        }
        self.cells
            .chunks(self.extent.cols)
            .map(<[i32]>::to_vec)
            .collect()
    }

    /// Apply a code-to-code mapping, returning a new grid. Nodata cells and
    /// codes absent from the map are kept as they are.
    pub fn reclassify(&self, mapping: &BTreeMap<i32, i32>) -> Result<Self> {
        if let Some((from, _)) = mapping.iter().find(|(_, to)| **to == self.nodata) {
            return Err(CarbonError::config(format!(
                "reclassification maps class {from} onto the nodata code {}",
                self.nodata
            )));
        }
        let cells = self
            .cells
            .iter()
            .map(|&code| {
                if code == self.nodata {
                    code
                } else {
                    mapping.get(&code).copied().unwrap_or(code)
                }
            })
            .collect();
        Ok(self.with_cells(cells))
    }

    /// Cell count per class code present in the grid, nodata excluded.
    pub fn class_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for &code in self.cells.iter().filter(|&&code| code != self.nodata) {
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }

    /// Check every code against the pool table before any aggregation starts.
    pub fn validate_against(&self, pools: &PoolTable) -> Result<()> {
        match self
            .class_counts()
            .into_iter()
            .find(|(code, _)| !pools.contains(*code))
        {
            Some((code, cells)) => Err(CarbonError::UnknownClass { code, cells }),
            None => Ok(()),
        }
    }

    pub(crate) fn with_cells(&self, cells: Vec<i32>) -> Self {
        debug_assert_eq!(cells.len(), self.cells.len());
        Self {
            extent: self.extent,
            cell_size_ha: self.cell_size_ha,
            nodata: self.nodata,
            cells,
        }
    }
}

/// Carbon density raster in Mg C/ha. NaN cells are treated as nodata as well
/// as cells equal to the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    extent: GridExtent,
    cell_size_ha: f64,
    nodata: f64,
    cells: Vec<f64>,
}

impl DensityGrid {
    pub const DEFAULT_NODATA: f64 = -9999.0;

    pub fn new(extent: GridExtent, cell_size_ha: f64, nodata: f64, cells: Vec<f64>) -> Result<Self> {
        check_cell_size(cell_size_ha)?;
        check_len(extent, cells.len())?;
        let grid = Self {
            extent,
            cell_size_ha,
            nodata,
            cells,
        };
        if let Some(idx) = grid
            .cells
            .iter()
            .position(|&v| !grid.is_nodata(v) && v.is_infinite())
        {
            return Err(CarbonError::config(format!(
                "density cell {idx} is not a finite value"
            )));
        }
        Ok(grid)
    }

    pub fn from_rows(rows: &[Vec<f64>], cell_size_ha: f64, nodata: f64) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(CarbonError::GridMismatch(
                "density rows have differing lengths".to_string(),
            ));
        }
        let cells = rows.iter().flatten().copied().collect();
        Self::new(GridExtent::new(rows.len(), cols), cell_size_ha, nodata, cells)
    }

    pub(crate) fn from_parts(extent: GridExtent, cell_size_ha: f64, nodata: f64, cells: Vec<f64>) -> Self {
        Self {
            extent,
            cell_size_ha,
            nodata,
            cells,
        }
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    pub fn cell_size_ha(&self) -> f64 {
        self.cell_size_ha
    }

    pub fn nodata(&self) -> f64 {
        self.nodata
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn geometry(&self) -> (GridExtent, f64) {
        (self.extent, self.cell_size_ha)
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || value == self.nodata
    }

    /// Density at a flat index, `None` for nodata or out of range.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.cells
            .get(index)
            .copied()
            .filter(|&v| !self.is_nodata(v))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.extent.index(row, col).and_then(|idx| self.value(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_conversion() {
        let extent = GridExtent::new(5, 10);
        let idx = extent.index(2, 3).unwrap();
        assert_eq!(idx, 23);
        assert_eq!(extent.position(idx), Some((2, 3)));
        assert_eq!(extent.index(5, 0), None);
        assert_eq!(extent.position(50), None);
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let err = ClassGrid::from_rows(&[vec![1, 1], vec![1]], 1.0, 0).unwrap_err();
        assert!(matches!(err, CarbonError::GridMismatch(_)));
    }

    #[test]
    fn test_rejects_non_positive_cell_size() {
        let err = ClassGrid::from_rows(&[vec![1]], 0.0, 0).unwrap_err();
        assert!(matches!(err, CarbonError::Configuration(_)));
    }

    #[test]
    fn test_reclassify_leaves_nodata() {
        let grid = ClassGrid::from_rows(&[vec![1, 2], vec![3, 0]], 1.0, 0).unwrap();
        let mapping = BTreeMap::from([(1, 10), (3, 30)]);
        let out = grid.reclassify(&mapping).unwrap();
        assert_eq!(out.to_rows(), vec![vec![10, 2], vec![30, 0]]);
        assert_eq!(grid.to_rows(), vec![vec![1, 2], vec![3, 0]]);

        let onto_nodata = BTreeMap::from([(2, 0)]);
        assert!(grid.reclassify(&onto_nodata).is_err());
    }

    #[test]
    fn test_derived_grid_keeps_geometry() {
        let grid = ClassGrid::from_rows(&[vec![1, 2, -1]], 0.09, -1).unwrap();
        let out = grid.reclassify(&BTreeMap::from([(2, 4)])).unwrap();
        assert_eq!(out.geometry(), grid.geometry());
        assert_eq!(out.nodata(), -1);
        assert_eq!(out.to_rows(), vec![vec![1, 4, -1]]);

        let copy = grid.with_cells(vec![7, 7, -1]);
        assert_eq!(copy.geometry(), grid.geometry());
        assert!(copy.is_nodata(-1));
    }

    #[test]
    fn test_class_counts_skip_nodata() {
        let grid = ClassGrid::from_rows(&[vec![1, 1], vec![2, 0]], 1.0, 0).unwrap();
        let counts = grid.class_counts();
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&2), Some(&1));
        assert_eq!(counts.get(&0), None);
    }

    #[test]
    fn test_density_nan_is_nodata() {
        let grid = DensityGrid::from_rows(&[vec![1.5, f64::NAN, -9999.0]], 1.0, -9999.0).unwrap();
        assert_eq!(grid.value(0), Some(1.5));
        assert_eq!(grid.value(1), None);
        assert_eq!(grid.value(2), None);
    }

    #[test]
    fn test_alignment_check() {
        let a = (GridExtent::new(2, 2), 1.0);
        assert!(ensure_aligned("test", a, (GridExtent::new(2, 2), 1.0)).is_ok());
        assert!(ensure_aligned("test", a, (GridExtent::new(2, 3), 1.0)).is_err());
        assert!(ensure_aligned("test", a, (GridExtent::new(2, 2), 0.09)).is_err());
    }
}

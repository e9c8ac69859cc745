//! Named boolean masks over a grid extent.
//!
//! Zones are independent of one another: a cell may sit in any number of
//! them, and statistics are always computed per zone.

use std::ops::Range;

use crate::error::{CarbonError, Result};
use crate::grid::{ClassGrid, GridExtent};

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    name: String,
    extent: GridExtent,
    mask: Vec<bool>,
}

impl Zone {
    pub fn from_mask(name: impl Into<String>, extent: GridExtent, mask: Vec<bool>) -> Result<Self> {
        let name = name.into();
        if mask.len() != extent.cell_count() {
            return Err(CarbonError::GridMismatch(format!(
                "zone '{name}' mask has {} cells, extent {extent} needs {}",
                mask.len(),
                extent.cell_count()
            )));
        }
        Ok(Self { name, extent, mask })
    }

    /// Every cell of the extent.
    pub fn all(name: impl Into<String>, extent: GridExtent) -> Self {
        Self {
            name: name.into(),
            extent,
            mask: vec![true; extent.cell_count()],
        }
    }

    /// Cells whose class code is one of `classes`.
    pub fn from_classes(name: impl Into<String>, grid: &ClassGrid, classes: &[i32]) -> Self {
        let mask = grid
            .cells()
            .iter()
            .map(|code| !grid.is_nodata(*code) && classes.contains(code))
            .collect();
        Self {
            name: name.into(),
            extent: grid.extent(),
            mask,
        }
    }

    /// Cells of an indicator raster that hold a non-zero, non-nodata value.
    pub fn from_indicator(name: impl Into<String>, grid: &ClassGrid) -> Self {
        let mask = grid
            .cells()
            .iter()
            .map(|&v| v != 0 && !grid.is_nodata(v))
            .collect();
        Self {
            name: name.into(),
            extent: grid.extent(),
            mask,
        }
    }

    /// Rectangular window, half-open on both axes.
    pub fn window(
        name: impl Into<String>,
        extent: GridExtent,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<Self> {
        let name = name.into();
        if rows.start > rows.end || cols.start > cols.end || rows.end > extent.rows || cols.end > extent.cols
        {
            return Err(CarbonError::config(format!(
                "zone '{name}': window rows {rows:?} cols {cols:?} does not fit extent {extent}"
            )));
        }
        let mut mask = vec![false; extent.cell_count()];
        for row in rows {
            let start = row * extent.cols;
            mask[start + cols.start..start + cols.end].fill(true);
        }
        Ok(Self { name, extent, mask })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn contains(&self, index: usize) -> bool {
        self.mask.get(index).copied().unwrap_or(false)
    }

    pub fn cell_count(&self) -> usize {
        self.mask.iter().filter(|&&inside| inside).count()
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fails with [`CarbonError::ZoneExtentMismatch`] unless the mask covers
    /// exactly `extent`.
    pub fn ensure_extent(&self, extent: GridExtent) -> Result<()> {
        if self.extent != extent {
            return Err(CarbonError::ZoneExtentMismatch {
                zone: self.name.clone(),
                expected: extent,
                found: self.extent,
            });
        }
        Ok(())
    }

    /// Ring of cells within `cells` steps (Chebyshev distance) of this zone.
    /// With `include_source` the zone itself is kept inside the result.
    pub fn buffer(&self, name: impl Into<String>, cells: usize, include_source: bool) -> Self {
        let GridExtent { rows, cols } = self.extent;
        let horizontal = dilate_lines(&self.mask, rows, cols, cols, 1, cells);
        let mut mask = dilate_lines(&horizontal, cols, rows, 1, cols, cells);
        if !include_source {
            for (cell, &source) in mask.iter_mut().zip(&self.mask) {
                *cell &= !source;
            }
        }
        Self {
            name: name.into(),
            extent: self.extent,
            mask,
        }
    }

    /// Cells in this zone but not in `other`.
    pub fn difference(&self, other: &Zone, name: impl Into<String>) -> Result<Self> {
        other.ensure_extent(self.extent)?;
        Ok(self.combine(other, name, |a, b| a && !b))
    }

    pub fn union(&self, other: &Zone, name: impl Into<String>) -> Result<Self> {
        other.ensure_extent(self.extent)?;
        Ok(self.combine(other, name, |a, b| a || b))
    }

    fn combine(&self, other: &Zone, name: impl Into<String>, op: impl Fn(bool, bool) -> bool) -> Self {
        let mask = self
            .mask
            .iter()
            .zip(&other.mask)
            .map(|(&a, &b)| op(a, b))
            .collect();
        Self {
            name: name.into(),
            extent: self.extent,
            mask,
        }
    }
}

/// One-dimensional dilation applied to `lines` independent lines of `len`
/// cells. `line_stride` and `step` describe how a line maps onto the flat
/// buffer, so the same routine serves rows and columns.
fn dilate_lines(
    mask: &[bool],
    lines: usize,
    len: usize,
    line_stride: usize,
    step: usize,
    radius: usize,
) -> Vec<bool> {
    let mut out = vec![false; mask.len()];
    let mut prefix = vec![0_usize; len + 1];
    for line in 0..lines {
        let base = line * line_stride;
        for i in 0..len {
            prefix[i + 1] = prefix[i] + usize::from(mask[base + i * step]);
        }
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            out[base + i * step] = prefix[hi] > prefix[lo];
        }
    }
    out
}

/// Ordered collection of zones with unique names.
#[derive(Debug, Clone, Default)]
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_zones(zones: impl IntoIterator<Item = Zone>) -> Result<Self> {
        let mut set = Self::new();
        for zone in zones {
            set.insert(zone)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, zone: Zone) -> Result<()> {
        if self.zones.iter().any(|z| z.name == zone.name) {
            return Err(CarbonError::DuplicateZone(zone.name));
        }
        self.zones.push(zone);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Zone> {
        self.zones
            .iter()
            .find(|zone| zone.name == name)
            .ok_or_else(|| CarbonError::UnknownZone(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn as_slice(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Check every zone against a grid extent.
    pub fn ensure_extent(&self, extent: GridExtent) -> Result<()> {
        self.zones.iter().try_for_each(|zone| zone.ensure_extent(extent))
    }
}

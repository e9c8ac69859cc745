//! Carbon pool lookup table: land-cover class to per-pool density.
//!
//! The table is built once and passed by reference into every operation that
//! needs it. Tabular input follows the usual carbon-model layout:
//!
//! ```text
//! lucode,lulc_name,c_above,c_below,c_soil,c_dead,price
//! 1,primary forest,200,40,100,20,
//! 7,mine,0,0,5,0,
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CarbonError, Result};
use crate::valuation::check_price;

/// Density of each carbon pool, Mg C/ha.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CarbonPools {
    #[serde(default)]
    pub above: f64,
    #[serde(default)]
    pub below: f64,
    #[serde(default)]
    pub soil: f64,
    #[serde(default)]
    pub dead: f64,
}

impl CarbonPools {
    pub fn new(above: f64, below: f64, soil: f64, dead: f64) -> Self {
        Self {
            above,
            below,
            soil,
            dead,
        }
    }

    pub fn total(&self) -> f64 {
        self.above + self.below + self.soil + self.dead
    }

    fn validate(&self, code: i32) -> Result<()> {
        for (pool, value) in [
            ("above", self.above),
            ("below", self.below),
            ("soil", self.soil),
            ("dead", self.dead),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CarbonError::config(format!(
                    "class {code}: {pool}-ground pool density must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCoverClass {
    pub code: i32,
    #[serde(default)]
    pub name: String,
    pub pools: CarbonPools,
    /// Price per carbon unit for this class, replacing the run-wide price.
    #[serde(default, rename = "price")]
    pub price_override: Option<f64>,
}

impl LandCoverClass {
    pub fn new(code: i32, name: impl Into<String>, pools: CarbonPools) -> Self {
        Self {
            code,
            name: name.into(),
            pools,
            price_override: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price_override = Some(price);
        self
    }
}

#[derive(Debug, Deserialize)]
struct PoolTableFile {
    classes: Vec<LandCoverClass>,
}

/// Immutable class-code → pools mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolTable {
    classes: BTreeMap<i32, LandCoverClass>,
}

impl PoolTable {
    pub fn new(classes: impl IntoIterator<Item = LandCoverClass>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for class in classes {
            class.pools.validate(class.code)?;
            if let Some(price) = class.price_override {
                check_price(&format!("class {} price override", class.code), price)?;
            }
            let code = class.code;
            if table.insert(code, class).is_some() {
                return Err(CarbonError::DuplicateClass(code));
            }
        }
        Ok(Self { classes: table })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: PoolTableFile = serde_yaml::from_str(text).map_err(|err| {
            let line = err.location().map_or(0, |loc| loc.line());
            CarbonError::parse(line, err.to_string())
        })?;
        Self::new(file.classes)
    }

    /// Parse a comma-separated pool table with a header row. Required columns
    /// are `lucode`, `c_above`, `c_below`, `c_soil` and `c_dead`; `lulc_name`
    /// and `price` are optional, and an empty `price` means no override.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (_, header) = lines
            .next()
            .ok_or_else(|| CarbonError::parse(1, "pool table is empty"))?;
        let columns = CsvColumns::from_header(header)?;

        let mut classes = Vec::new();
        for (line_no, line) in lines {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            classes.push(columns.class_from(&fields, line_no)?);
        }
        Self::new(classes)
    }

    pub fn get(&self, code: i32) -> Option<&LandCoverClass> {
        self.classes.get(&code)
    }

    pub fn contains(&self, code: i32) -> bool {
        self.classes.contains_key(&code)
    }

    /// Sum of all pools for a class.
    pub fn total_density(&self, code: i32) -> Option<f64> {
        self.classes.get(&code).map(|class| class.pools.total())
    }

    pub fn price_override(&self, code: i32) -> Option<f64> {
        self.classes.get(&code).and_then(|class| class.price_override)
    }

    pub fn has_price_overrides(&self) -> bool {
        self.classes.values().any(|class| class.price_override.is_some())
    }

    /// Classes in ascending code order.
    pub fn classes(&self) -> impl Iterator<Item = &LandCoverClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

struct CsvColumns {
    width: usize,
    code: usize,
    name: Option<usize>,
    above: usize,
    below: usize,
    soil: usize,
    dead: usize,
    price: Option<usize>,
}

impl CsvColumns {
    fn from_header(header: &str) -> Result<Self> {
        let names: Vec<String> = header
            .split(',')
            .map(|name| name.trim().to_ascii_lowercase())
            .collect();
        let find = |wanted: &str| names.iter().position(|name| name == wanted);
        let require = |wanted: &str| {
            find(wanted).ok_or_else(|| {
                CarbonError::parse(1, format!("pool table is missing the '{wanted}' column"))
            })
        };
        Ok(Self {
            width: names.len(),
            code: require("lucode")?,
            name: find("lulc_name"),
            above: require("c_above")?,
            below: require("c_below")?,
            soil: require("c_soil")?,
            dead: require("c_dead")?,
            price: find("price"),
        })
    }

    fn class_from(&self, fields: &[&str], line: usize) -> Result<LandCoverClass> {
        if fields.len() != self.width {
            return Err(CarbonError::parse(
                line,
                format!("expected {} fields, found {}", self.width, fields.len()),
            ));
        }
        let code = fields[self.code]
            .parse::<i32>()
            .map_err(|_| CarbonError::parse(line, format!("invalid lucode '{}'", fields[self.code])))?;
        let number = |idx: usize| -> Result<f64> {
            fields[idx]
                .parse::<f64>()
                .map_err(|_| CarbonError::parse(line, format!("invalid number '{}'", fields[idx])))
        };
        let pools = CarbonPools::new(
            number(self.above)?,
            number(self.below)?,
            number(self.soil)?,
            number(self.dead)?,
        );
        let name = self
            .name
            .map(|idx| fields[idx].to_string())
            .unwrap_or_default();
        let price_override = match self.price {
            Some(idx) if !fields[idx].is_empty() => Some(number(idx)?),
            _ => None,
        };
        Ok(LandCoverClass {
            code,
            name,
            pools,
            price_override,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
lucode,lulc_name,c_above,c_below,c_soil,c_dead,price
1,primary forest,200,40,100,20,
2,shrub,70,20,60,5,
7,mine,0,0,5,0,12.5
";

    #[test]
    fn test_csv_totals_and_overrides() {
        let table = PoolTable::from_csv_str(CSV).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.total_density(1), Some(360.0));
        assert_eq!(table.total_density(2), Some(155.0));
        assert_eq!(table.get(1).unwrap().name, "primary forest");
        assert_eq!(table.price_override(1), None);
        assert_eq!(table.price_override(7), Some(12.5));
        assert!(table.has_price_overrides());
    }

    #[test]
    fn test_csv_missing_column() {
        let err = PoolTable::from_csv_str("lucode,c_above,c_below,c_soil\n1,1,1,1\n").unwrap_err();
        assert!(err.to_string().contains("c_dead"));
    }

    #[test]
    fn test_csv_bad_number_reports_line() {
        let text = "lucode,c_above,c_below,c_soil,c_dead\n1,1,1,1,1\n2,x,1,1,1\n";
        match PoolTable::from_csv_str(text).unwrap_err() {
            CarbonError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_rejects_negative_density() {
        let class = LandCoverClass::new(1, "forest", CarbonPools::new(-1.0, 0.0, 0.0, 0.0));
        assert!(matches!(
            PoolTable::new([class]),
            Err(CarbonError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_codes() {
        let a = LandCoverClass::new(1, "a", CarbonPools::default());
        let b = LandCoverClass::new(1, "b", CarbonPools::default());
        assert!(matches!(
            PoolTable::new([a, b]),
            Err(CarbonError::DuplicateClass(1))
        ));
    }

    #[test]
    fn test_yaml_table() {
        let text = r#"
classes:
  - code: 1
    name: forest
    pools: { above: 200, below: 40, soil: 100, dead: 20 }
  - code: 2
    name: mine
    pools: { soil: 20 }
    price: 30
"#;
        let table = PoolTable::from_yaml_str(text).unwrap();
        assert_eq!(table.total_density(2), Some(20.0));
        assert_eq!(table.price_override(2), Some(30.0));
        let codes: Vec<i32> = table.classes().map(|c| c.code).collect();
        assert_eq!(codes, vec![1, 2]);
    }
}

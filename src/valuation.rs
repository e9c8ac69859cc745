//! Monetary value of carbon stocks and discounted sequestration streams.
//!
//! The price unit is always explicit: a price quoted per Mg CO2 is applied
//! to carbon mass through `co2_per_c`, never through an inferred factor.

use serde::{Deserialize, Serialize};

use crate::error::{CarbonError, Result};

/// Molecular mass ratio CO2 : C, rounded the way carbon-market figures are.
pub const DEFAULT_CO2_PER_C: f64 = 3.67;

pub const DEFAULT_DISCOUNT_RATE: f64 = 0.04;

/// Tolerance on a sequestration schedule summing to one.
const SCHEDULE_TOLERANCE: f64 = 1e-6;

fn default_co2_per_c() -> f64 {
    DEFAULT_CO2_PER_C
}

fn default_discount_rate() -> f64 {
    DEFAULT_DISCOUNT_RATE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceUnit {
    #[serde(rename = "per_mg_c")]
    PerMgCarbon,
    #[serde(rename = "per_mg_co2")]
    PerMgCo2,
}

/// How a zone's carbon delta is spread over the horizon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequestrationSchedule {
    /// Equal share every year.
    #[default]
    Linear,
    /// Fraction of the delta realised in each year; one entry per year.
    Schedule(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationParameters {
    /// Currency per unit given by `price_unit`.
    pub price: f64,
    pub price_unit: PriceUnit,
    #[serde(default = "default_co2_per_c")]
    pub co2_per_c: f64,
    /// Fraction per year.
    #[serde(default = "default_discount_rate")]
    pub discount_rate: f64,
    #[serde(default)]
    pub horizon_years: Option<u32>,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub sequestration: SequestrationSchedule,
}

impl ValuationParameters {
    pub fn per_carbon(price: f64) -> Self {
        Self {
            price,
            price_unit: PriceUnit::PerMgCarbon,
            co2_per_c: DEFAULT_CO2_PER_C,
            discount_rate: DEFAULT_DISCOUNT_RATE,
            horizon_years: None,
            sequestration: SequestrationSchedule::Linear,
        }
    }

    pub fn per_co2(price: f64) -> Self {
        Self {
            price_unit: PriceUnit::PerMgCo2,
            ..Self::per_carbon(price)
        }
    }

    pub fn with_discount_rate(mut self, rate: f64) -> Self {
        self.discount_rate = rate;
        self
    }

    pub fn with_horizon(mut self, years: u32) -> Self {
        self.horizon_years = Some(years);
        self
    }

    pub fn with_schedule(mut self, schedule: SequestrationSchedule) -> Self {
        self.sequestration = schedule;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_price("price", self.price)?;
        if !self.co2_per_c.is_finite() || self.co2_per_c <= 0.0 {
            return Err(CarbonError::config(format!(
                "co2_per_c must be positive, got {}",
                self.co2_per_c
            )));
        }
        if !self.discount_rate.is_finite() || self.discount_rate < 0.0 {
            return Err(CarbonError::config(format!(
                "discount rate must be a non-negative fraction, got {}",
                self.discount_rate
            )));
        }
        if self.horizon_years == Some(0) {
            return Err(CarbonError::config("horizon must be at least one year"));
        }
        if let SequestrationSchedule::Schedule(fractions) = &self.sequestration {
            let horizon = self.horizon_years.ok_or_else(|| {
                CarbonError::config("a sequestration schedule needs horizon_years")
            })?;
            if fractions.len() != horizon as usize {
                return Err(CarbonError::config(format!(
                    "sequestration schedule has {} entries for a {horizon}-year horizon",
                    fractions.len()
                )));
            }
            if fractions.iter().any(|f| !f.is_finite() || *f < 0.0) {
                return Err(CarbonError::config(
                    "sequestration fractions must be non-negative numbers",
                ));
            }
            let sum: f64 = fractions.iter().sum();
            if (sum - 1.0).abs() > SCHEDULE_TOLERANCE {
                return Err(CarbonError::config(format!(
                    "sequestration fractions must sum to 1, got {sum}"
                )));
            }
        }
        Ok(())
    }

    /// Mass multiplier turning Mg C into the priced unit.
    pub fn unit_factor(&self) -> f64 {
        match self.price_unit {
            PriceUnit::PerMgCarbon => 1.0,
            PriceUnit::PerMgCo2 => self.co2_per_c,
        }
    }
}

pub(crate) fn check_price(what: &str, price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(CarbonError::config(format!(
            "{what} must be a non-negative number, got {price}"
        )));
    }
    Ok(())
}

/// Value of a carbon mass at the run-wide price.
pub fn value_of(carbon_mg: f64, params: &ValuationParameters) -> f64 {
    value_at(carbon_mg, params.price, params)
}

/// Value of a carbon mass at an explicit price in `params.price_unit`.
pub fn value_at(carbon_mg: f64, price: f64, params: &ValuationParameters) -> f64 {
    carbon_mg * params.unit_factor() * price
}

/// Present value of holding a stock worth `stock_value` permanently: the
/// value divided by the discount rate. `None` at a zero rate, where the sum
/// diverges.
pub fn perpetuity_value(stock_value: f64, params: &ValuationParameters) -> Option<f64> {
    (params.discount_rate > 0.0).then(|| stock_value / params.discount_rate)
}

/// Which assumption produced an annual flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAssumption {
    Linear,
    Schedule,
}

/// Annual carbon uptake, Mg C per year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequestrationFlow {
    Constant(f64),
    PerYear(Vec<f64>),
}

impl SequestrationFlow {
    pub fn assumption(&self) -> FlowAssumption {
        match self {
            SequestrationFlow::Constant(_) => FlowAssumption::Linear,
            SequestrationFlow::PerYear(_) => FlowAssumption::Schedule,
        }
    }

    /// Spread a total stock change over the horizon according to
    /// `params.sequestration`.
    pub fn for_delta(delta_mg: f64, params: &ValuationParameters) -> Result<Self> {
        params.validate()?;
        let horizon = params
            .horizon_years
            .ok_or_else(|| CarbonError::config("sequestration needs horizon_years"))?;
        Ok(match &params.sequestration {
            SequestrationSchedule::Linear => SequestrationFlow::Constant(delta_mg / f64::from(horizon)),
            SequestrationSchedule::Schedule(fractions) => {
                SequestrationFlow::PerYear(fractions.iter().map(|f| f * delta_mg).collect())
            }
        })
    }

    fn amount(&self, year: usize) -> f64 {
        match self {
            SequestrationFlow::Constant(rate) => *rate,
            SequestrationFlow::PerYear(flows) => flows[year],
        }
    }
}

/// Discounted present value of an annual flow over `params.horizon_years`:
/// the sum over years `t = 0..horizon` of `value_of(flow[t]) / (1 + r)^t`.
pub fn sequestration_value(flow: &SequestrationFlow, params: &ValuationParameters) -> Result<f64> {
    params.validate()?;
    let horizon = params
        .horizon_years
        .ok_or_else(|| CarbonError::config("sequestration value needs horizon_years"))?
        as usize;
    if let SequestrationFlow::PerYear(flows) = flow {
        if flows.len() != horizon {
            return Err(CarbonError::config(format!(
                "flow has {} years for a {horizon}-year horizon",
                flows.len()
            )));
        }
    }

    let growth = 1.0 + params.discount_rate;
    let mut discount = 1.0;
    let mut total = 0.0;
    for year in 0..horizon {
        total += value_of(flow.amount(year), params) / discount;
        discount *= growth;
    }
    Ok(total)
}

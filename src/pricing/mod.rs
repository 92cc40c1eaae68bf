//! Price policy: decides the currency and unit price of each listing.
//!
//! Two variants: a single-currency linear bonding curve, and a weighted
//! random pick between fixed-price currencies.

pub mod curve;
pub mod currency;

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{ListerError, ListerResult};
use crate::types::{BondingCurveState, CurrencyOption};
use currency::{weighted_choice, RandomSource};

/// Currency and unit price for one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub currency: CurrencyOption,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub enum PricePolicy {
    /// Price follows the scheduler's `BondingCurveState`.
    BondingCurve { currency: CurrencyOption },
    /// Currency drawn by weight; each currency carries its own price.
    Weighted { currencies: Vec<CurrencyOption> },
}

impl PricePolicy {
    /// Currencies in configuration order.
    pub fn currencies(&self) -> Vec<&CurrencyOption> {
        match self {
            PricePolicy::BondingCurve { currency } => vec![currency],
            PricePolicy::Weighted { currencies } => currencies.iter().collect(),
        }
    }

    pub fn is_bonding_curve(&self) -> bool {
        matches!(self, PricePolicy::BondingCurve { .. })
    }

    /// Quote the next listing.
    ///
    /// `forced` pins the currency for the weighted variant. The bonding
    /// curve has a single currency and ignores it.
    pub fn quote(
        &self,
        curve: Option<&BondingCurveState>,
        forced: Option<&str>,
        rng: &mut dyn RandomSource,
    ) -> ListerResult<Quote> {
        match self {
            PricePolicy::BondingCurve { currency } => {
                let curve = curve.ok_or_else(|| {
                    ListerError::InvalidConfig("bonding curve pricing without curve state".into())
                })?;
                if let Some(symbol) = forced.filter(|s| *s != currency.symbol) {
                    debug!(forced = symbol, using = %currency.symbol, "Bonding curve ignores forced currency");
                }
                Ok(Quote {
                    currency: currency.clone(),
                    unit_price: curve.current_price(),
                })
            }
            PricePolicy::Weighted { currencies } => {
                let weights: Vec<(String, f64)> = currencies
                    .iter()
                    .map(|c| (c.symbol.clone(), c.weight))
                    .collect();
                let symbol = weighted_choice(&weights, forced, rng)?;
                let option = currencies
                    .iter()
                    .find(|c| c.symbol == symbol)
                    .ok_or_else(|| {
                        ListerError::InvalidConfig(format!("unknown currency: {symbol}"))
                    })?;
                Ok(Quote {
                    currency: option.clone(),
                    unit_price: option.unit_price,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

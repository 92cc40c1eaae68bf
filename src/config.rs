//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads the config file and deserializes into strongly-typed structs.
//! Secrets (signing key, RPC endpoint) are referenced by env-var name in the
//! config and resolved at startup. Prices are written as strings so they
//! parse straight into `Decimal`.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::retry::RetryPolicy;
use crate::engine::scheduler::{ScheduleStrategy, SchedulerSettings};
use crate::error::{ListerError, ListerResult};
use crate::marketplace::thirdweb::{Contracts, GasSettings};
use crate::pricing::currency::{validate_weights, DaytimeGuard};
use crate::pricing::curve::PRICE_SCALE;
use crate::pricing::PricePolicy;
use crate::types::{BondingCurveState, CurrencyOption};

/// Env var overriding `gas.max_fee_per_gas`.
pub const MAX_FEE_ENV: &str = "MAX_FEE_PER_GAS";
/// Env var overriding `gas.max_priority_fee_per_gas`.
pub const MAX_PRIORITY_FEE_ENV: &str = "MAX_PRIORITY_FEE_PER_GAS";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub lister: ListerConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
    pub pricing: PricingConfig,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListerConfig {
    pub name: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Log writes instead of sending transactions.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_listing_delay_secs")]
    pub listing_delay_secs: u64,
    /// Listings created once right after startup.
    #[serde(default)]
    pub initial_listings: u64,
    #[serde(default = "default_listing_duration_days")]
    pub listing_duration_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url_env")]
    pub rpc_url_env: String,
    /// Endpoint used when the env var is unset.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// ERC-1155 edition contract.
    pub edition: String,
    /// MarketplaceV3 contract.
    pub marketplace: String,
    pub token_id: u64,
}

/// EIP-1559 fee caps in wei.
#[derive(Debug, Deserialize, Clone)]
pub struct GasConfig {
    #[serde(default = "default_max_fee_per_gas")]
    pub max_fee_per_gas: u64,
    #[serde(default = "default_max_priority_fee_per_gas")]
    pub max_priority_fee_per_gas: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            max_fee_per_gas: default_max_fee_per_gas(),
            max_priority_fee_per_gas: default_max_priority_fee_per_gas(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScheduleConfig {
    FixedInterval {
        interval_secs: u64,
    },
    HourAligned {
        #[serde(default = "default_poll_interval_secs")]
        poll_interval_secs: u64,
        #[serde(default)]
        daytime: Option<DaytimeConfig>,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaytimeConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PricingConfig {
    BondingCurve {
        currency: String,
        start_price: String,
        max_price: String,
        total_supply: u64,
        /// Units already sold when the lister starts.
        sold_count: u64,
        last_index: u64,
    },
    Weighted,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub symbol: String,
    pub address: String,
    /// Fixed price in whole units. Required for the weighted policy.
    #[serde(default)]
    pub unit_price: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default)]
    pub weight: f64,
    /// ERC-20 allowance granted to the marketplace at startup.
    #[serde(default)]
    pub approve_allowance: Option<String>,
}

/// Secrets resolved from the environment.
pub struct Secrets {
    pub private_key: SecretString,
    pub rpc_url: String,
}

fn default_log_file() -> String {
    "edition-lister.log".into()
}
fn default_error_backoff_secs() -> u64 {
    300
}
fn default_listing_delay_secs() -> u64 {
    2
}
fn default_listing_duration_days() -> i64 {
    90
}
fn default_rpc_url_env() -> String {
    "RPC_URL".into()
}
fn default_private_key_env() -> String {
    "PRIVATE_KEY".into()
}
fn default_max_fee_per_gas() -> u64 {
    5_000_000_000
}
fn default_max_priority_fee_per_gas() -> u64 {
    1_000_000_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    3000
}
fn default_poll_interval_secs() -> u64 {
    600
}
fn default_decimals() -> u8 {
    18
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without the environment.
    pub fn validate(&self) -> ListerResult<()> {
        self.contracts()?;
        self.price_policy()?;
        self.bonding_curve()?;
        self.schedule_strategy()?;
        if self.lister.listing_duration_days <= 0 {
            return Err(invalid("lister.listing_duration_days must be positive"));
        }
        Ok(())
    }

    pub fn secrets(&self) -> ListerResult<Secrets> {
        self.secrets_from(|name| std::env::var(name).ok())
    }

    /// Resolve secrets through `lookup`.
    pub fn secrets_from(&self, lookup: impl Fn(&str) -> Option<String>) -> ListerResult<Secrets> {
        let private_key = lookup(&self.chain.private_key_env)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ListerError::ConfigMissing(self.chain.private_key_env.clone()))?;
        let rpc_url = lookup(&self.chain.rpc_url_env)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.chain.rpc_url.clone())
            .ok_or_else(|| ListerError::ConfigMissing(self.chain.rpc_url_env.clone()))?;
        Ok(Secrets {
            private_key: SecretString::new(private_key),
            rpc_url,
        })
    }

    pub fn gas_settings(&self) -> ListerResult<GasSettings> {
        self.gas_settings_from(|name| std::env::var(name).ok())
    }

    /// TOML fee caps, overridden by `MAX_FEE_PER_GAS` and
    /// `MAX_PRIORITY_FEE_PER_GAS` when `lookup` has them.
    pub fn gas_settings_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ListerResult<GasSettings> {
        let read = |name: &str, fallback: u64| -> ListerResult<u128> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u128>()
                    .map_err(|_| invalid(format!("{name} must be an integer wei amount, got {raw:?}"))),
                None => Ok(u128::from(fallback)),
            }
        };
        Ok(GasSettings {
            max_fee_per_gas: read(MAX_FEE_ENV, self.gas.max_fee_per_gas)?,
            max_priority_fee_per_gas: read(
                MAX_PRIORITY_FEE_ENV,
                self.gas.max_priority_fee_per_gas,
            )?,
        })
    }

    pub fn contracts(&self) -> ListerResult<Contracts> {
        Ok(Contracts {
            edition: parse_address("chain.edition", &self.chain.edition)?,
            marketplace: parse_address("chain.marketplace", &self.chain.marketplace)?,
        })
    }

    pub fn price_policy(&self) -> ListerResult<PricePolicy> {
        match &self.pricing {
            PricingConfig::BondingCurve {
                currency,
                start_price,
                ..
            } => {
                let raw = self.find_currency(currency)?;
                if u32::from(raw.decimals) < PRICE_SCALE {
                    return Err(invalid(format!(
                        "currency {} has {} decimals, curve prices need {PRICE_SCALE}",
                        raw.symbol, raw.decimals
                    )));
                }
                let start = parse_decimal("pricing.start_price", start_price)?;
                let option = CurrencyOption {
                    symbol: raw.symbol.clone(),
                    contract_address: parse_address(&raw.symbol, &raw.address)?,
                    unit_price: start,
                    decimals: raw.decimals,
                    weight: 1.0,
                    approve_allowance: parse_allowance(raw)?,
                };
                check_amounts(&option)?;
                Ok(PricePolicy::BondingCurve { currency: option })
            }
            PricingConfig::Weighted => {
                if self.currencies.is_empty() {
                    return Err(invalid("weighted pricing needs at least one [[currencies]] entry"));
                }
                let weights: Vec<(String, f64)> = self
                    .currencies
                    .iter()
                    .map(|c| (c.symbol.clone(), c.weight))
                    .collect();
                validate_weights(&weights)?;

                let currencies = self
                    .currencies
                    .iter()
                    .map(|raw| {
                        let price = raw.unit_price.as_deref().ok_or_else(|| {
                            invalid(format!("currency {} needs a unit_price", raw.symbol))
                        })?;
                        let option = CurrencyOption {
                            symbol: raw.symbol.clone(),
                            contract_address: parse_address(&raw.symbol, &raw.address)?,
                            unit_price: parse_decimal(&raw.symbol, price)?,
                            decimals: raw.decimals,
                            weight: raw.weight,
                            approve_allowance: parse_allowance(raw)?,
                        };
                        check_amounts(&option)?;
                        Ok(option)
                    })
                    .collect::<ListerResult<Vec<_>>>()?;
                Ok(PricePolicy::Weighted { currencies })
            }
        }
    }

    /// Starting curve progress, present for the bonding-curve policy.
    pub fn bonding_curve(&self) -> ListerResult<Option<BondingCurveState>> {
        let PricingConfig::BondingCurve {
            start_price,
            max_price,
            total_supply,
            sold_count,
            last_index,
            ..
        } = &self.pricing
        else {
            return Ok(None);
        };

        let start = parse_decimal("pricing.start_price", start_price)?;
        let max = parse_decimal("pricing.max_price", max_price)?;
        if start <= Decimal::ZERO || max < start {
            return Err(invalid("pricing requires 0 < start_price <= max_price"));
        }
        if *total_supply == 0 {
            return Err(invalid("pricing.total_supply must be positive"));
        }
        if sold_count > total_supply {
            return Err(invalid(format!(
                "pricing.sold_count {sold_count} exceeds total_supply {total_supply}"
            )));
        }
        Ok(Some(BondingCurveState {
            start_price: start,
            max_price: max,
            total_supply: *total_supply,
            sold_count: *sold_count,
            last_index: *last_index,
        }))
    }

    pub fn schedule_strategy(&self) -> ListerResult<ScheduleStrategy> {
        match &self.schedule {
            ScheduleConfig::FixedInterval { interval_secs } => {
                if *interval_secs == 0 {
                    return Err(invalid("schedule.interval_secs must be positive"));
                }
                Ok(ScheduleStrategy::FixedInterval {
                    interval: Duration::from_secs(*interval_secs),
                })
            }
            ScheduleConfig::HourAligned {
                poll_interval_secs,
                daytime,
            } => {
                if *poll_interval_secs == 0 {
                    return Err(invalid("schedule.poll_interval_secs must be positive"));
                }
                let daytime = match daytime {
                    Some(d) => {
                        if d.start_hour > 23 || d.end_hour > 24 {
                            return Err(invalid("schedule.daytime hours must be within 0..=24"));
                        }
                        self.find_currency(&d.currency)?;
                        Some(DaytimeGuard {
                            start_hour: d.start_hour,
                            end_hour: d.end_hour,
                            currency: d.currency.clone(),
                        })
                    }
                    None => None,
                };
                Ok(ScheduleStrategy::HourAligned {
                    poll_interval: Duration::from_secs(*poll_interval_secs),
                    daytime,
                })
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
        }
    }

    pub fn scheduler_settings(&self) -> ListerResult<SchedulerSettings> {
        Ok(SchedulerSettings {
            token_id: U256::from(self.chain.token_id),
            strategy: self.schedule_strategy()?,
            retry: self.retry_policy(),
            listing_duration: chrono::Duration::days(self.lister.listing_duration_days),
            listing_delay: Duration::from_secs(self.lister.listing_delay_secs),
            error_backoff: Duration::from_secs(self.lister.error_backoff_secs),
            initial_listings: self.lister.initial_listings,
        })
    }

    fn find_currency(&self, symbol: &str) -> ListerResult<&CurrencyConfig> {
        self.currencies
            .iter()
            .find(|c| c.symbol == symbol)
            .ok_or_else(|| invalid(format!("currency {symbol} is not listed in [[currencies]]")))
    }
}

fn invalid(msg: impl Into<String>) -> ListerError {
    ListerError::InvalidConfig(msg.into())
}

fn parse_address(field: &str, raw: &str) -> ListerResult<Address> {
    Address::from_str(raw.trim()).map_err(|e| invalid(format!("{field}: bad address {raw:?}: {e}")))
}

fn parse_decimal(field: &str, raw: &str) -> ListerResult<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|e| invalid(format!("{field}: bad amount {raw:?}: {e}")))
}

/// The unit price must be positive, and it and the allowance must be
/// exact in the currency's base units.
fn check_amounts(option: &CurrencyOption) -> ListerResult<()> {
    if option.unit_price <= Decimal::ZERO {
        return Err(invalid(format!(
            "currency {}: unit_price must be positive, got {}",
            option.symbol, option.unit_price
        )));
    }
    let exact = |field: &str, amount: Decimal| {
        option
            .to_base_units(amount)
            .map(|_| ())
            .map_err(|e| invalid(format!("{field}: {e}")))
    };
    exact(&format!("{} unit_price", option.symbol), option.unit_price)?;
    if let Some(allowance) = option.approve_allowance {
        exact(&format!("{} approve_allowance", option.symbol), allowance)?;
    }
    Ok(())
}

fn parse_allowance(raw: &CurrencyConfig) -> ListerResult<Option<Decimal>> {
    raw.approve_allowance
        .as_deref()
        .map(|a| parse_decimal(&raw.symbol, a))
        .transpose()
}

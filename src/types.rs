//! Shared types for the lister.
//!
//! The data model used across pricing, the marketplace seam and the
//! scheduler. Kept free of I/O so every module can depend on it.

use alloy::primitives::utils::parse_units;
use alloy::primitives::{address, Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::pricing::curve::linear_price;

/// Sentinel currency address the marketplace treats as the native coin.
pub const NATIVE_CURRENCY: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// A currency listings can be priced in.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyOption {
    /// Display symbol, also the key used by weights and the daytime guard.
    pub symbol: String,
    pub contract_address: Address,
    /// Price per unit in whole currency units (e.g. 0.0005 ETH).
    pub unit_price: Decimal,
    pub decimals: u8,
    /// Probability weight for the randomized policy.
    pub weight: f64,
    /// ERC-20 allowance granted to the marketplace at startup, in whole units.
    pub approve_allowance: Option<Decimal>,
}

impl CurrencyOption {
    pub fn is_native(&self) -> bool {
        self.contract_address == NATIVE_CURRENCY
    }

    /// Whole-unit amount to the currency's base units.
    ///
    /// Fails on negative amounts and on amounts with more fractional digits
    /// than the currency carries, so nothing is rounded on the way on-chain.
    pub fn to_base_units(&self, amount: Decimal) -> anyhow::Result<U256> {
        let amount = amount.normalize();
        if amount.is_sign_negative() {
            anyhow::bail!("Cannot convert negative amount {amount} {}", self.symbol);
        }
        if amount.scale() > u32::from(self.decimals) {
            anyhow::bail!(
                "{amount} {} has {} decimal places, the currency has {}",
                self.symbol,
                amount.scale(),
                self.decimals
            );
        }
        let parsed = parse_units(&amount.to_string(), self.decimals).map_err(|e| {
            anyhow::anyhow!(
                "Cannot convert {amount} {} to {}-decimal units: {e}",
                self.symbol,
                self.decimals
            )
        })?;
        Ok(parsed.get_absolute())
    }
}

impl fmt::Display for CurrencyOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.contract_address)
    }
}

// ---------------------------------------------------------------------------
// Bonding curve
// ---------------------------------------------------------------------------

/// Progress along a linear bonding curve.
#[derive(Debug, Clone, PartialEq)]
pub struct BondingCurveState {
    pub start_price: Decimal,
    pub max_price: Decimal,
    pub total_supply: u64,
    /// Units already sold. Never exceeds `total_supply`.
    pub sold_count: u64,
    /// Number of the most recently listed unit.
    pub last_index: u64,
}

impl BondingCurveState {
    /// Price of the next listing.
    pub fn current_price(&self) -> Decimal {
        linear_price(
            self.sold_count,
            self.total_supply,
            self.start_price,
            self.max_price,
        )
    }

    pub fn remaining(&self) -> u64 {
        self.total_supply.saturating_sub(self.sold_count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.sold_count >= self.total_supply
    }

    /// Advance after a confirmed listing.
    pub fn record_listing(&mut self) {
        if self.sold_count < self.total_supply {
            self.sold_count += 1;
        }
        self.last_index += 1;
    }
}

impl fmt::Display for BondingCurveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} sold | last #{} | next price {}",
            self.sold_count,
            self.total_supply,
            self.last_index,
            self.current_price(),
        )
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One direct listing of a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRequest {
    /// Sequence number used in logs.
    pub listing_number: u64,
    pub token_id: U256,
    /// Always 1: one listing exposes exactly one unit.
    pub quantity: u64,
    pub currency: CurrencyOption,
    pub unit_price: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ListingRequest {
    pub fn new(
        listing_number: u64,
        token_id: U256,
        currency: CurrencyOption,
        unit_price: Decimal,
        start_time: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> Self {
        Self {
            listing_number,
            token_id,
            quantity: 1,
            currency,
            unit_price,
            start_time,
            end_time: start_time + duration,
        }
    }
}

impl fmt::Display for ListingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} token {} x{} @ {} {}",
            self.listing_number, self.token_id, self.quantity, self.unit_price, self.currency.symbol,
        )
    }
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub gas_used: u128,
}

impl TxReceipt {
    /// Synthetic receipt for writes that were only logged.
    pub fn dry_run() -> Self {
        Self {
            transaction_hash: format!("dry-run-{}", uuid::Uuid::new_v4()),
            gas_used: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// A single balance read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceObservation {
    pub timestamp: DateTime<Utc>,
    pub balance: u64,
}

/// Delta between two consecutive balance observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Increased(u64),
    Decreased(u64),
    Unchanged,
}

impl fmt::Display for BalanceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceChange::Increased(n) => write!(f, "+{n}"),
            BalanceChange::Decreased(n) => write!(f, "-{n}"),
            BalanceChange::Unchanged => write!(f, "unchanged"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Listing,
    Waiting,
    Done,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPhase::Idle => write!(f, "IDLE"),
            SchedulerPhase::Listing => write!(f, "LISTING"),
            SchedulerPhase::Waiting => write!(f, "WAITING"),
            SchedulerPhase::Done => write!(f, "DONE"),
        }
    }
}

/// Everything the scheduler mutates. Owned by the caller and handed to
/// each cycle by `&mut`.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub phase: SchedulerPhase,
    /// Present when pricing follows the bonding curve.
    pub curve: Option<BondingCurveState>,
    pub last_observation: BalanceObservation,
    /// Sales detected but not yet relisted.
    pub pending_listings: u64,
    pub listings_created: u64,
    pub cycles: u64,
}

impl SchedulerState {
    pub fn new(curve: Option<BondingCurveState>, first: BalanceObservation) -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            curve,
            last_observation: first,
            pending_listings: 0,
            listings_created: 0,
            cycles: 0,
        }
    }

    pub fn balance(&self) -> u64 {
        self.last_observation.balance
    }

    /// Replace the tracked balance.
    pub fn track(&mut self, observation: BalanceObservation) {
        self.last_observation = observation;
    }

    pub fn record_listing(&mut self) {
        self.listings_created += 1;
        if let Some(curve) = self.curve.as_mut() {
            curve.record_listing();
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | balance={} | listed={} | pending={} | cycles={}",
            self.phase,
            self.balance(),
            self.listings_created,
            self.pending_listings,
            self.cycles,
        )?;
        if let Some(curve) = &self.curve {
            write!(f, " | curve: {curve}")?;
        }
        Ok(())
    }
}

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Supply or balance exhausted.
    Completed,
    /// Shutdown requested.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub listings_created: u64,
    pub cycles: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Marketplace integration.
//!
//! Defines the `Marketplace` trait, the narrow slice of the chain SDK the
//! lister needs, and provides:
//! - `thirdweb`: alloy bindings for an ERC-1155 edition listed on a
//!   thirdweb MarketplaceV3 deployment
//! - `DryRunMarketplace`: passes reads through, logs writes

pub mod thirdweb;

use anyhow::Result;
use async_trait::async_trait;
use alloy::primitives::{Address, U256};
use tracing::info;

use crate::types::{ListingRequest, TxReceipt};

/// Abstraction over the edition contract and the marketplace it lists on.
///
/// Every call is a fallible network operation. Writes resolve once the
/// transaction is mined.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Account whose balance is tracked and listed from.
    fn holder(&self) -> Address;

    /// ERC-1155 balance of `token_id` held by `holder`.
    async fn token_balance(&self, holder: Address, token_id: U256) -> Result<u64>;

    /// Whether the marketplace may transfer the holder's editions.
    async fn is_marketplace_approved(&self, holder: Address) -> Result<bool>;

    /// Grant or revoke the marketplace as operator for all editions.
    async fn set_approval_for_all(&self, approved: bool) -> Result<TxReceipt>;

    /// ERC-20 `approve` of the marketplace as spender of `token`.
    async fn approve_spender(&self, token: Address, amount: U256) -> Result<TxReceipt>;

    /// Create one direct listing.
    async fn create_listing(&self, request: &ListingRequest) -> Result<TxReceipt>;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Forwards reads to the wrapped marketplace and only logs writes.
pub struct DryRunMarketplace<M> {
    inner: M,
}

impl<M: Marketplace> DryRunMarketplace<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M: Marketplace> Marketplace for DryRunMarketplace<M> {
    fn holder(&self) -> Address {
        self.inner.holder()
    }

    async fn token_balance(&self, holder: Address, token_id: U256) -> Result<u64> {
        self.inner.token_balance(holder, token_id).await
    }

    async fn is_marketplace_approved(&self, holder: Address) -> Result<bool> {
        self.inner.is_marketplace_approved(holder).await
    }

    async fn set_approval_for_all(&self, approved: bool) -> Result<TxReceipt> {
        info!(approved, "[DRY RUN] Would set marketplace approval");
        Ok(TxReceipt::dry_run())
    }

    async fn approve_spender(&self, token: Address, amount: U256) -> Result<TxReceipt> {
        info!(token = %token, amount = %amount, "[DRY RUN] Would approve ERC-20 spender");
        Ok(TxReceipt::dry_run())
    }

    async fn create_listing(&self, request: &ListingRequest) -> Result<TxReceipt> {
        info!(
            listing = request.listing_number,
            currency = %request.currency.symbol,
            price = %request.unit_price,
            ends = %request.end_time,
            "[DRY RUN] Would create listing"
        );
        Ok(TxReceipt::dry_run())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

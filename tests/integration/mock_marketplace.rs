//! In-memory marketplace for integration testing.
//!
//! Provides a deterministic `Marketplace` implementation whose balance
//! reads, approvals and listings are fully controllable from test code.

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use edition_lister::marketplace::Marketplace;
use edition_lister::types::{ListingRequest, TxReceipt};

/// A mock marketplace for deterministic testing.
///
/// Balance reads pop from a script first; once the script is empty the
/// current balance is returned. With custody enabled every successful
/// listing moves one unit out of the holder's balance.
#[derive(Clone)]
pub struct MemoryMarketplace {
    holder: Address,
    script: Arc<Mutex<VecDeque<u64>>>,
    balance: Arc<Mutex<u64>>,
    custody: bool,
    approved: Arc<Mutex<bool>>,
    listings: Arc<Mutex<Vec<ListingRequest>>>,
    spender_approvals: Arc<Mutex<Vec<(Address, U256)>>>,
    approval_txs: Arc<Mutex<u32>>,
    /// Number of upcoming `create_listing` calls that fail.
    failing_listings: Arc<Mutex<u32>>,
    /// If set, balance reads return this error.
    read_error: Arc<Mutex<Option<String>>>,
}

impl MemoryMarketplace {
    pub fn new(balance: u64) -> Self {
        Self {
            holder: Address::repeat_byte(0xAA),
            script: Arc::new(Mutex::new(VecDeque::new())),
            balance: Arc::new(Mutex::new(balance)),
            custody: true,
            approved: Arc::new(Mutex::new(true)),
            listings: Arc::new(Mutex::new(Vec::new())),
            spender_approvals: Arc::new(Mutex::new(Vec::new())),
            approval_txs: Arc::new(Mutex::new(0)),
            failing_listings: Arc::new(Mutex::new(0)),
            read_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Listings leave the balance untouched.
    pub fn without_custody(mut self) -> Self {
        self.custody = false;
        self
    }

    /// Replay these balances on the next reads.
    pub fn script_balances(&self, balances: &[u64]) {
        self.script.lock().unwrap().extend(balances.iter().copied());
    }

    pub fn set_balance(&self, balance: u64) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_approved(&self, approved: bool) {
        *self.approved.lock().unwrap() = approved;
    }

    pub fn fail_next_listings(&self, count: u32) {
        *self.failing_listings.lock().unwrap() = count;
    }

    pub fn set_read_error(&self, msg: Option<&str>) {
        *self.read_error.lock().unwrap() = msg.map(str::to_string);
    }

    pub fn listings(&self) -> Vec<ListingRequest> {
        self.listings.lock().unwrap().clone()
    }

    pub fn spender_approvals(&self) -> Vec<(Address, U256)> {
        self.spender_approvals.lock().unwrap().clone()
    }

    pub fn approval_txs(&self) -> u32 {
        *self.approval_txs.lock().unwrap()
    }

    fn receipt() -> TxReceipt {
        TxReceipt {
            transaction_hash: format!("0x{}", Uuid::new_v4().simple()),
            gas_used: 150_000,
        }
    }
}

#[async_trait]
impl Marketplace for MemoryMarketplace {
    fn holder(&self) -> Address {
        self.holder
    }

    async fn token_balance(&self, holder: Address, _token_id: U256) -> Result<u64> {
        if let Some(err) = self.read_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        if holder != self.holder {
            return Ok(0);
        }
        let mut balance = self.balance.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *balance = next;
        }
        Ok(*balance)
    }

    async fn is_marketplace_approved(&self, _holder: Address) -> Result<bool> {
        Ok(*self.approved.lock().unwrap())
    }

    async fn set_approval_for_all(&self, approved: bool) -> Result<TxReceipt> {
        *self.approved.lock().unwrap() = approved;
        *self.approval_txs.lock().unwrap() += 1;
        Ok(Self::receipt())
    }

    async fn approve_spender(&self, token: Address, amount: U256) -> Result<TxReceipt> {
        self.spender_approvals.lock().unwrap().push((token, amount));
        Ok(Self::receipt())
    }

    async fn create_listing(&self, request: &ListingRequest) -> Result<TxReceipt> {
        {
            let mut failing = self.failing_listings.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(anyhow!("execution reverted: nonce too low"));
            }
        }
        if !*self.approved.lock().unwrap() {
            return Err(anyhow!("marketplace is not an approved operator"));
        }
        if self.custody {
            let mut balance = self.balance.lock().unwrap();
            if *balance == 0 {
                return Err(anyhow!("insufficient token balance"));
            }
            *balance -= 1;
        }
        self.listings.lock().unwrap().push(request.clone());
        Ok(Self::receipt())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use edition_lister::types::{CurrencyOption, NATIVE_CURRENCY};
    use rust_decimal_macros::dec;

    fn request() -> ListingRequest {
        let eth = CurrencyOption {
            symbol: "ETH".into(),
            contract_address: NATIVE_CURRENCY,
            unit_price: dec!(0.0005),
            decimals: 18,
            weight: 1.0,
            approve_allowance: None,
        };
        ListingRequest::new(
            1,
            U256::from(0),
            eth,
            dec!(0.0005),
            Utc::now(),
            chrono::Duration::days(90),
        )
    }

    #[tokio::test]
    async fn test_scripted_balances_then_sticky() {
        let mock = MemoryMarketplace::new(10);
        mock.script_balances(&[9, 7]);
        let holder = mock.holder();
        assert_eq!(mock.token_balance(holder, U256::ZERO).await.unwrap(), 9);
        assert_eq!(mock.token_balance(holder, U256::ZERO).await.unwrap(), 7);
        assert_eq!(mock.token_balance(holder, U256::ZERO).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_listing_takes_custody() {
        let mock = MemoryMarketplace::new(2);
        mock.create_listing(&request()).await.unwrap();
        assert_eq!(
            mock.token_balance(mock.holder(), U256::ZERO).await.unwrap(),
            1
        );
        assert_eq!(mock.listings().len(), 1);
    }

    #[tokio::test]
    async fn test_forced_listing_failures() {
        let mock = MemoryMarketplace::new(5);
        mock.fail_next_listings(2);
        assert!(mock.create_listing(&request()).await.is_err());
        assert!(mock.create_listing(&request()).await.is_err());
        assert!(mock.create_listing(&request()).await.is_ok());
        assert_eq!(mock.listings().len(), 1);
    }

    #[tokio::test]
    async fn test_unapproved_listing_rejected() {
        let mock = MemoryMarketplace::new(5);
        mock.set_approved(false);
        let err = mock.create_listing(&request()).await.unwrap_err();
        assert!(err.to_string().contains("approved"));
    }

    #[tokio::test]
    async fn test_read_error() {
        let mock = MemoryMarketplace::new(5);
        mock.set_read_error(Some("rpc unavailable"));
        assert!(mock.token_balance(mock.holder(), U256::ZERO).await.is_err());
        mock.set_read_error(None);
        assert!(mock.token_balance(mock.holder(), U256::ZERO).await.is_ok());
    }
}

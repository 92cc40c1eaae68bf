//! Balance watcher.
//!
//! One uncached read of the holder's edition balance per call. Failures are
//! surfaced as `NetworkRead`; retrying is left to the caller.

use alloy::primitives::{Address, U256};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ListerError, ListerResult};
use crate::marketplace::Marketplace;
use crate::types::{BalanceChange, BalanceObservation};

/// Classify the delta between two balance reads.
pub fn classify(previous: u64, current: u64) -> BalanceChange {
    match current.cmp(&previous) {
        std::cmp::Ordering::Less => BalanceChange::Decreased(previous - current),
        std::cmp::Ordering::Greater => BalanceChange::Increased(current - previous),
        std::cmp::Ordering::Equal => BalanceChange::Unchanged,
    }
}

pub struct BalanceWatcher {
    marketplace: Arc<dyn Marketplace>,
    holder: Address,
    token_id: U256,
}

impl BalanceWatcher {
    pub fn new(marketplace: Arc<dyn Marketplace>, holder: Address, token_id: U256) -> Self {
        Self {
            marketplace,
            holder,
            token_id,
        }
    }

    pub async fn observe(&self) -> ListerResult<BalanceObservation> {
        match self.marketplace.token_balance(self.holder, self.token_id).await {
            Ok(balance) => {
                debug!(token_id = %self.token_id, balance, "Balance read");
                Ok(BalanceObservation {
                    timestamp: Utc::now(),
                    balance,
                })
            }
            Err(e) => {
                warn!(token_id = %self.token_id, error = %e, "Balance read failed");
                Err(ListerError::NetworkRead(format!(
                    "balance of token {} for {}: {e:#}",
                    self.token_id, self.holder
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

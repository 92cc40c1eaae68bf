//! Listing scheduler: the bootstrap → wait → observe → list loop.
//!
//! Two strategies share the same listing path:
//!
//! - **Fixed interval**: sleep, read the balance, relist one unit per unit
//!   sold since the last read.
//! - **Hour aligned**: wait for the next top of the hour while polling the
//!   balance. A drop during the wait is relisted immediately; otherwise the
//!   scheduled listings for that hour are created.
//!
//! Every listing is quoted, submitted under the retry policy, then
//! confirmed by re-reading the balance.

use alloy::primitives::U256;
use chrono::{Timelike, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::clock::{until_next_hour, Timer};
use super::retry::{with_retry, RetryPolicy};
use super::watcher::{classify, BalanceWatcher};
use crate::error::{ListerError, ListerResult};
use crate::marketplace::Marketplace;
use crate::pricing::currency::{DaytimeGuard, RandomSource};
use crate::pricing::PricePolicy;
use crate::types::{
    BalanceChange, BondingCurveState, ListingRequest, RunOutcome, RunSummary, SchedulerPhase,
    SchedulerState,
};

/// Smallest poll step while waiting for the top of the hour.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleStrategy {
    FixedInterval {
        interval: Duration,
    },
    HourAligned {
        poll_interval: Duration,
        daytime: Option<DaytimeGuard>,
    },
}

impl ScheduleStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleStrategy::FixedInterval { .. } => "fixed_interval",
            ScheduleStrategy::HourAligned { .. } => "hour_aligned",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub token_id: U256,
    pub strategy: ScheduleStrategy,
    pub retry: RetryPolicy,
    /// How long each listing stays open.
    pub listing_duration: chrono::Duration,
    /// Pause between consecutive listings in one batch.
    pub listing_delay: Duration,
    /// Pause after a failed cycle.
    pub error_backoff: Duration,
    /// Listings created right after bootstrap.
    pub initial_listings: u64,
}

/// Outcome of waiting for the top of the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HourWait {
    Elapsed,
    /// Balance dropped by this many units mid-wait.
    Interrupted(u64),
}

pub struct ListingScheduler {
    marketplace: Arc<dyn Marketplace>,
    watcher: BalanceWatcher,
    policy: PricePolicy,
    settings: SchedulerSettings,
    timer: Timer,
    rng: Box<dyn RandomSource>,
}

impl ListingScheduler {
    pub fn new(
        marketplace: Arc<dyn Marketplace>,
        policy: PricePolicy,
        settings: SchedulerSettings,
        timer: Timer,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        let watcher =
            BalanceWatcher::new(marketplace.clone(), marketplace.holder(), settings.token_id);
        Self {
            marketplace,
            watcher,
            policy,
            settings,
            timer,
            rng,
        }
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Grant marketplace approvals, take the first balance reading and queue
    /// the initial listings.
    pub async fn bootstrap(
        &mut self,
        curve: Option<BondingCurveState>,
    ) -> ListerResult<SchedulerState> {
        if self.policy.is_bonding_curve() && curve.is_none() {
            return Err(ListerError::InvalidConfig(
                "bonding curve policy requires curve state".into(),
            ));
        }

        info!(
            holder = %self.marketplace.holder(),
            token_id = %self.settings.token_id,
            strategy = self.settings.strategy.name(),
            "Bootstrapping lister"
        );

        if let Some(curve) = &curve {
            info!(
                sold = curve.sold_count,
                total = curve.total_supply,
                last_index = curve.last_index,
                next_price = %curve.current_price(),
                "Bonding curve loaded"
            );
        }

        self.ensure_approvals().await?;

        let first = self.watcher.observe().await?;
        info!(balance = first.balance, "Initial balance");

        let mut state = SchedulerState::new(curve, first);
        state.pending_listings = self.settings.initial_listings;
        Ok(state)
    }

    async fn ensure_approvals(&self) -> ListerResult<()> {
        let holder = self.marketplace.holder();
        let approved = self
            .marketplace
            .is_marketplace_approved(holder)
            .await
            .map_err(|e| ListerError::NetworkRead(format!("approval status: {e:#}")))?;

        if approved {
            info!("Marketplace already approved for the edition");
        } else {
            info!("Approving marketplace for the edition");
            let marketplace = &self.marketplace;
            let receipt = with_retry(
                "setApprovalForAll",
                &self.settings.retry,
                &self.timer,
                || async move { submission(marketplace.set_approval_for_all(true).await) },
            )
            .await?;
            info!(tx_hash = %receipt.transaction_hash, "Marketplace approved");
        }

        for currency in self.policy.currencies() {
            let Some(allowance) = currency.approve_allowance else {
                continue;
            };
            if currency.is_native() {
                continue;
            }
            let amount = currency
                .to_base_units(allowance)
                .map_err(|e| ListerError::InvalidConfig(format!("{e:#}")))?;
            let operation = format!("approve {}", currency.symbol);
            let marketplace = &self.marketplace;
            let token = currency.contract_address;
            let receipt = with_retry(&operation, &self.settings.retry, &self.timer, || async move {
                submission(marketplace.approve_spender(token, amount).await)
            })
            .await?;
            info!(
                currency = %currency.symbol,
                allowance = %allowance,
                tx_hash = %receipt.transaction_hash,
                "Spender approved"
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Run cycles until supply is exhausted or shutdown is requested.
    ///
    /// A failed cycle is logged and followed by the error backoff; only
    /// configuration errors end the run.
    pub async fn run(&mut self, mut state: SchedulerState) -> ListerResult<RunSummary> {
        info!(state = %state, "Starting listing loop");

        loop {
            if self.is_done(&state) {
                state.phase = SchedulerPhase::Done;
                info!(
                    listings = state.listings_created,
                    cycles = state.cycles,
                    "Nothing left to list"
                );
                return Ok(summary(&state, RunOutcome::Completed));
            }
            if self.timer.is_cancelled() {
                return Ok(summary(&state, RunOutcome::Cancelled));
            }

            let result = self.run_cycle(&mut state).await;
            state.cycles += 1;

            match result {
                Ok(()) => debug!(state = %state, "Cycle complete"),
                Err(ListerError::Cancelled) => {
                    info!(state = %state, "Shutdown requested, stopping");
                    return Ok(summary(&state, RunOutcome::Cancelled));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    state.phase = SchedulerPhase::Idle;
                    error!(
                        cycle = state.cycles,
                        error = %e,
                        backoff_secs = self.settings.error_backoff.as_secs(),
                        "Scheduling cycle failed"
                    );
                    if let Err(ListerError::Cancelled) =
                        self.timer.sleep(self.settings.error_backoff).await
                    {
                        return Ok(summary(&state, RunOutcome::Cancelled));
                    }
                }
            }
        }
    }

    /// One cycle of the configured strategy.
    pub async fn run_cycle(&mut self, state: &mut SchedulerState) -> ListerResult<()> {
        let strategy = self.settings.strategy.clone();
        let result = match strategy {
            ScheduleStrategy::FixedInterval { interval } => {
                self.fixed_interval_cycle(state, interval).await
            }
            ScheduleStrategy::HourAligned {
                poll_interval,
                daytime,
            } => {
                self.hour_aligned_cycle(state, poll_interval, daytime.as_ref())
                    .await
            }
        };
        if result.is_ok() {
            state.phase = SchedulerPhase::Idle;
        }
        result
    }

    pub fn is_done(&self, state: &SchedulerState) -> bool {
        match &self.policy {
            PricePolicy::BondingCurve { .. } => {
                state.curve.as_ref().map_or(true, |c| c.is_exhausted())
            }
            PricePolicy::Weighted { .. } => state.balance() == 0,
        }
    }

    async fn fixed_interval_cycle(
        &mut self,
        state: &mut SchedulerState,
        interval: Duration,
    ) -> ListerResult<()> {
        // Leftovers from an interrupted cycle go out before the next wait.
        self.flush_pending(state).await?;
        if self.is_done(state) {
            return Ok(());
        }

        state.phase = SchedulerPhase::Waiting;
        info!(
            wait_minutes = format!("{:.1}", interval.as_secs_f64() / 60.0),
            "Waiting before next balance check"
        );
        self.timer.sleep(interval).await?;

        let observation = self.watcher.observe().await?;
        let previous = state.balance();
        let change = classify(previous, observation.balance);
        debug!(previous, current = observation.balance, change = %change, "Balance observed");
        match change {
            BalanceChange::Decreased(sold) => {
                info!(
                    from = previous,
                    to = observation.balance,
                    sold,
                    "Balance decreased, relisting"
                );
                state.pending_listings += sold;
            }
            BalanceChange::Increased(added) => {
                info!(
                    from = previous,
                    to = observation.balance,
                    added,
                    "Balance increased, tracking new balance"
                );
            }
            BalanceChange::Unchanged => {
                info!(balance = previous, "Balance unchanged, no new listings needed");
            }
        }
        state.track(observation);

        self.flush_pending(state).await
    }

    async fn hour_aligned_cycle(
        &mut self,
        state: &mut SchedulerState,
        poll_interval: Duration,
        daytime: Option<&DaytimeGuard>,
    ) -> ListerResult<()> {
        self.flush_pending(state).await?;
        if self.is_done(state) {
            return Ok(());
        }

        match self.wait_for_top_of_hour(state, poll_interval).await? {
            HourWait::Interrupted(sold) => {
                info!(sold, "Sale detected while waiting, relisting now");
                state.pending_listings += sold;
                self.flush_pending(state).await
            }
            HourWait::Elapsed => self.scheduled_listings(state, daytime).await,
        }
    }

    /// Poll the balance until the next top of the hour.
    async fn wait_for_top_of_hour(
        &mut self,
        state: &mut SchedulerState,
        poll_interval: Duration,
    ) -> ListerResult<HourWait> {
        state.phase = SchedulerPhase::Waiting;
        let poll = poll_interval.max(MIN_POLL_INTERVAL);
        let now = self.timer.now();
        let total = until_next_hour(&now);
        let target = now + chrono::Duration::from_std(total).unwrap_or_else(|_| chrono::Duration::hours(1));

        info!(
            next_run = %target.format("%H:%M"),
            wait_minutes = format!("{:.1}", total.as_secs_f64() / 60.0),
            "Scheduled listings at top of hour"
        );

        let mut waited = Duration::ZERO;
        while waited < total {
            let step = poll.min(total - waited);
            self.timer.sleep(step).await?;
            waited += step;

            let observation = self.watcher.observe().await?;
            let previous = state.balance();
            match classify(previous, observation.balance) {
                BalanceChange::Decreased(sold) => {
                    info!(from = previous, to = observation.balance, "Balance decreased");
                    state.track(observation);
                    return Ok(HourWait::Interrupted(sold));
                }
                BalanceChange::Increased(_) => {
                    info!(
                        from = previous,
                        to = observation.balance,
                        "Balance increased, continuing to wait"
                    );
                    state.track(observation);
                }
                BalanceChange::Unchanged => {
                    debug!(
                        balance = previous,
                        remaining_secs = (total - waited).as_secs(),
                        "No change, still waiting"
                    );
                }
            }
        }
        Ok(HourWait::Elapsed)
    }

    /// The top-of-hour action: one listing in the daytime currency while the
    /// guard is active, otherwise one per configured currency.
    async fn scheduled_listings(
        &mut self,
        state: &mut SchedulerState,
        daytime: Option<&DaytimeGuard>,
    ) -> ListerResult<()> {
        let now = self.timer.now();
        let hour = now.hour();
        let guard = daytime.filter(|g| g.is_active(hour));

        info!(
            time = %now.format("%Y-%m-%d %H:%M:%S"),
            hour,
            daytime = guard.is_some(),
            "Top of hour reached"
        );

        let slots: Vec<String> = match guard {
            Some(g) => vec![g.currency.clone()],
            None => self
                .policy
                .currencies()
                .into_iter()
                .map(|c| c.symbol.clone())
                .collect(),
        };

        for (i, symbol) in slots.iter().enumerate() {
            if state.curve.as_ref().is_some_and(|c| c.is_exhausted()) {
                break;
            }
            if i > 0 {
                if state.balance() == 0 {
                    info!(skipped = slots.len() - i, "No tokens left, skipping remaining currencies");
                    break;
                }
                self.timer.sleep(self.settings.listing_delay).await?;
            }
            self.create_listing(state, Some(symbol.as_str())).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// Create every queued listing, spaced by the listing delay.
    async fn flush_pending(&mut self, state: &mut SchedulerState) -> ListerResult<()> {
        if state.pending_listings == 0 {
            return Ok(());
        }
        cap_pending(state);

        info!(count = state.pending_listings, "Creating listings");
        let mut first = true;
        while state.pending_listings > 0 {
            if !first {
                self.timer.sleep(self.settings.listing_delay).await?;
            }
            first = false;
            self.create_listing(state, None).await?;
            state.pending_listings -= 1;
            // Confirmation may have queued more.
            cap_pending(state);
        }
        Ok(())
    }

    /// Quote, submit and confirm a single listing.
    async fn create_listing(
        &mut self,
        state: &mut SchedulerState,
        forced: Option<&str>,
    ) -> ListerResult<()> {
        state.phase = SchedulerPhase::Listing;

        let quote = self
            .policy
            .quote(state.curve.as_ref(), forced, self.rng.as_mut())?;
        let number = match &state.curve {
            Some(curve) => curve.last_index + 1,
            None => state.listings_created + 1,
        };
        let request = ListingRequest::new(
            number,
            self.settings.token_id,
            quote.currency,
            quote.unit_price,
            self.timer.now().with_timezone(&Utc),
            self.settings.listing_duration,
        );

        info!(listing = %request, "Creating listing");
        let started = Instant::now();
        let operation = format!("listing #{number}");
        let marketplace = &self.marketplace;
        let submitted = &request;
        let receipt = with_retry(&operation, &self.settings.retry, &self.timer, || async move {
            submission(marketplace.create_listing(submitted).await)
        })
        .await?;
        info!(
            listing = number,
            tx_hash = %receipt.transaction_hash,
            gas_used = receipt.gas_used,
            elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
            "Listing created"
        );

        let before = state.balance();
        state.record_listing();
        self.confirm_listing(state, before, number).await;
        Ok(())
    }

    /// Re-read the balance after a listing. The listing accounts for one
    /// unit; anything below that was sold meanwhile and is queued.
    async fn confirm_listing(&self, state: &mut SchedulerState, before: u64, number: u64) {
        match self.watcher.observe().await {
            Ok(observation) => {
                let after = observation.balance;
                if after >= before {
                    warn!(
                        listing = number,
                        before,
                        after,
                        "Balance did not decrease after listing"
                    );
                }
                let expected = before.saturating_sub(1);
                if after < expected {
                    let sold = expected - after;
                    info!(
                        listing = number,
                        expected,
                        after,
                        sold,
                        "Sales seen while confirming listing"
                    );
                    state.pending_listings += sold;
                }
                state.track(observation);
            }
            Err(e) => warn!(listing = number, error = %e, "Could not confirm listing"),
        }
    }
}

/// Never queue more listings than the curve has left.
fn cap_pending(state: &mut SchedulerState) {
    if let Some(curve) = &state.curve {
        if state.pending_listings > curve.remaining() {
            warn!(
                pending = state.pending_listings,
                remaining = curve.remaining(),
                "Capping listings at remaining supply"
            );
            state.pending_listings = curve.remaining();
        }
    }
}

/// Marketplace writes surface as transaction failures.
fn submission<T>(result: anyhow::Result<T>) -> ListerResult<T> {
    result.map_err(|e| ListerError::Transaction(format!("{e:#}")))
}

fn summary(state: &SchedulerState, outcome: RunOutcome) -> RunSummary {
    RunSummary {
        outcome,
        listings_created: state.listings_created,
        cycles: state.cycles,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

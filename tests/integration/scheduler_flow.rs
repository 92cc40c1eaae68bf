//! Scheduler flows on a simulated clock.
//!
//! Each test drives `ListingScheduler` against `MemoryMarketplace` with a
//! `ManualClock`, so waits complete instantly and are recorded.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Local, TimeZone};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use edition_lister::engine::clock::{ManualClock, Shutdown, ShutdownTrigger, Timer};
use edition_lister::engine::retry::RetryPolicy;
use edition_lister::engine::scheduler::{ListingScheduler, ScheduleStrategy, SchedulerSettings};
use edition_lister::error::ListerError;
use edition_lister::marketplace::DryRunMarketplace;
use edition_lister::pricing::curve::linear_price;
use edition_lister::pricing::currency::{DaytimeGuard, SequenceRandom};
use edition_lister::pricing::PricePolicy;
use edition_lister::types::{BondingCurveState, CurrencyOption, RunOutcome, NATIVE_CURRENCY};

use crate::mock_marketplace::MemoryMarketplace;

const TEN_MINUTES: Duration = Duration::from_secs(600);

fn eth(weight: f64) -> CurrencyOption {
    CurrencyOption {
        symbol: "ETH".into(),
        contract_address: NATIVE_CURRENCY,
        unit_price: dec!(0.0005),
        decimals: 18,
        weight,
        approve_allowance: None,
    }
}

fn astr() -> CurrencyOption {
    CurrencyOption {
        symbol: "ASTR".into(),
        contract_address: Address::repeat_byte(0x2c),
        unit_price: dec!(30),
        decimals: 18,
        weight: 0.65,
        approve_allowance: Some(dec!(100000)),
    }
}

fn bonding() -> PricePolicy {
    PricePolicy::BondingCurve { currency: eth(1.0) }
}

fn weighted() -> PricePolicy {
    PricePolicy::Weighted {
        currencies: vec![eth(0.35), astr()],
    }
}

fn curve(sold: u64, total: u64) -> BondingCurveState {
    BondingCurveState {
        start_price: dec!(0.00001),
        max_price: dec!(0.69),
        total_supply: total,
        sold_count: sold,
        last_index: sold,
    }
}

fn fixed_interval() -> ScheduleStrategy {
    ScheduleStrategy::FixedInterval {
        interval: TEN_MINUTES,
    }
}

fn hour_aligned() -> ScheduleStrategy {
    ScheduleStrategy::HourAligned {
        poll_interval: TEN_MINUTES,
        daytime: Some(DaytimeGuard {
            start_hour: 13,
            end_hour: 19,
            currency: "ASTR".into(),
        }),
    }
}

fn settings(strategy: ScheduleStrategy) -> SchedulerSettings {
    SchedulerSettings {
        token_id: U256::from(2),
        strategy,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        },
        listing_duration: chrono::Duration::days(90),
        listing_delay: Duration::from_secs(2),
        error_backoff: Duration::from_secs(60),
        initial_listings: 0,
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 3, 4, hour, minute, 0).unwrap()
}

struct Harness {
    clock: ManualClock,
    trigger: ShutdownTrigger,
    scheduler: ListingScheduler,
}

fn harness(
    mock: &MemoryMarketplace,
    policy: PricePolicy,
    settings: SchedulerSettings,
    start: DateTime<Local>,
    draws: Vec<f64>,
) -> Harness {
    let clock = ManualClock::new(start);
    let (trigger, shutdown) = Shutdown::channel();
    let timer = Timer::new(Arc::new(clock.clone()), shutdown);
    let scheduler = ListingScheduler::new(
        Arc::new(mock.clone()),
        policy,
        settings,
        timer,
        Box::new(SequenceRandom::new(draws)),
    );
    Harness {
        clock,
        trigger,
        scheduler,
    }
}

fn symbols(mock: &MemoryMarketplace) -> Vec<String> {
    mock.listings()
        .iter()
        .map(|l| l.currency.symbol.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bootstrap_grants_missing_approvals() {
    let mock = MemoryMarketplace::new(5);
    mock.set_approved(false);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(20, 30), vec![0.5]);

    let state = h.scheduler.bootstrap(None).await.unwrap();

    assert_eq!(state.balance(), 5);
    assert_eq!(mock.approval_txs(), 1);
    let approvals = mock.spender_approvals();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].0, Address::repeat_byte(0x2c));
}

#[tokio::test]
async fn bootstrap_skips_approval_when_present() {
    let mock = MemoryMarketplace::new(5);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);
    h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    assert_eq!(mock.approval_txs(), 0);
    assert!(mock.spender_approvals().is_empty());
}

// ---------------------------------------------------------------------------
// Fixed interval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fixed_interval_relists_each_sale() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 10, 7]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();
    assert!(mock.listings().is_empty());

    h.scheduler.run_cycle(&mut state).await.unwrap();

    let listings = mock.listings();
    assert_eq!(listings.len(), 3);
    assert_eq!(
        listings.iter().map(|l| l.listing_number).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );
    for (i, listing) in listings.iter().enumerate() {
        let sold = 3 + i as u64;
        assert_eq!(listing.unit_price, linear_price(sold, 666, dec!(0.00001), dec!(0.69)));
        assert_eq!(listing.quantity, 1);
        assert_eq!(listing.end_time - listing.start_time, chrono::Duration::days(90));
    }

    let c = state.curve.as_ref().unwrap();
    assert_eq!(c.sold_count, 6);
    assert_eq!(c.last_index, 6);
    assert_eq!(state.balance(), 4);
    assert_eq!(
        h.clock.sleeps(),
        vec![
            TEN_MINUTES,
            TEN_MINUTES,
            Duration::from_secs(2),
            Duration::from_secs(2)
        ]
    );

    // Unchanged reads afterwards list nothing more.
    h.scheduler.run_cycle(&mut state).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();
    assert_eq!(mock.listings().len(), 3);
    assert_eq!(state.curve.as_ref().unwrap().sold_count, 6);
    assert_eq!(state.balance(), 4);
    assert_eq!(h.clock.sleeps().len(), 6);
}

#[tokio::test]
async fn sale_during_confirmation_is_relisted() {
    let mock = MemoryMarketplace::new(10);
    // bootstrap, cycle read, confirmation read
    mock.script_balances(&[10, 9, 7]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    for _ in 0..3 {
        h.scheduler.run_cycle(&mut state).await.unwrap();
    }

    let listings = mock.listings();
    assert_eq!(
        listings.iter().map(|l| l.listing_number).collect::<Vec<_>>(),
        vec![4, 5]
    );
    let c = state.curve.as_ref().unwrap();
    assert_eq!(c.sold_count, 5);
    assert_eq!(state.pending_listings, 0);
    assert_eq!(state.balance(), 6);
}

#[tokio::test]
async fn confirmation_sales_capped_at_remaining_supply() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 9, 6]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 5))).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(mock.listings().len(), 2);
    let c = state.curve.as_ref().unwrap();
    assert_eq!((c.sold_count, c.remaining()), (5, 0));
    assert_eq!(state.pending_listings, 0);
    assert!(h.scheduler.is_done(&state));
}

#[tokio::test]
async fn single_sale_advances_curve_by_one() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 9]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    let listings = mock.listings();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].unit_price, dec!(0.00311806));
    assert_eq!(listings[0].currency.contract_address, NATIVE_CURRENCY);
    let c = state.curve.as_ref().unwrap();
    assert_eq!((c.sold_count, c.last_index), (4, 4));
}

#[tokio::test]
async fn balance_increase_only_updates_tracking() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 12]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert!(mock.listings().is_empty());
    assert_eq!(state.balance(), 12);
}

#[tokio::test]
async fn unconfirmed_listing_still_advances_counters() {
    let mock = MemoryMarketplace::new(10).without_custody();
    mock.script_balances(&[10, 9]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(mock.listings().len(), 1);
    assert_eq!(state.listings_created, 1);
    assert_eq!(state.curve.as_ref().unwrap().sold_count, 4);
    assert_eq!(state.balance(), 9);
}

// ---------------------------------------------------------------------------
// Hour aligned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn daytime_hour_lists_guard_currency_only() {
    let mock = MemoryMarketplace::new(5);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(12, 30), vec![0.1]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(symbols(&mock), vec!["ASTR"]);
    assert_eq!(mock.listings()[0].unit_price, dec!(30));
    assert_eq!(h.clock.sleeps(), vec![TEN_MINUTES; 3]);
    assert_eq!(state.balance(), 4);
}

#[tokio::test]
async fn night_hour_lists_every_currency_in_order() {
    let mock = MemoryMarketplace::new(5);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(20, 30), vec![0.9]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(symbols(&mock), vec!["ETH", "ASTR"]);
    assert_eq!(
        h.clock.sleeps(),
        vec![TEN_MINUTES, TEN_MINUTES, TEN_MINUTES, Duration::from_secs(2)]
    );
    assert_eq!(state.balance(), 3);
}

#[tokio::test]
async fn night_hour_stops_when_balance_runs_out() {
    let mock = MemoryMarketplace::new(1);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(20, 30), vec![0.9]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(symbols(&mock), vec!["ETH"]);
    assert_eq!(state.balance(), 0);
    assert!(h.scheduler.is_done(&state));
}

#[tokio::test]
async fn mid_wait_sale_relists_immediately() {
    let mock = MemoryMarketplace::new(5);
    mock.script_balances(&[5, 5, 3]);
    let mut h = harness(
        &mock,
        weighted(),
        settings(hour_aligned()),
        at(12, 30),
        vec![0.1, 0.9],
    );

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    // Two weighted draws, no top-of-hour action.
    assert_eq!(symbols(&mock), vec!["ETH", "ASTR"]);
    assert_eq!(
        h.clock.sleeps(),
        vec![TEN_MINUTES, TEN_MINUTES, Duration::from_secs(2)]
    );
    assert!(h.clock.total_slept() < Duration::from_secs(30 * 60));
}

#[tokio::test]
async fn mid_wait_sale_ignores_daytime_guard() {
    let mock = MemoryMarketplace::new(5);
    mock.script_balances(&[5, 4]);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(14, 5), vec![0.1]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(symbols(&mock), vec!["ETH"]);
}

#[tokio::test]
async fn last_poll_chunk_is_the_remainder() {
    let mock = MemoryMarketplace::new(5);
    let mut h = harness(&mock, weighted(), settings(hour_aligned()), at(20, 45), vec![0.9]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    h.scheduler.run_cycle(&mut state).await.unwrap();

    let sleeps = h.clock.sleeps();
    assert_eq!(sleeps[..2], [TEN_MINUTES, Duration::from_secs(5 * 60)]);
}

#[tokio::test]
async fn initial_listing_goes_out_before_first_wait() {
    let mock = MemoryMarketplace::new(5);
    let mut s = settings(hour_aligned());
    s.initial_listings = 1;
    let mut h = harness(&mock, weighted(), s, at(20, 30), vec![0.9]);

    let mut state = h.scheduler.bootstrap(None).await.unwrap();
    assert_eq!(state.pending_listings, 1);
    h.scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(symbols(&mock), vec!["ASTR", "ETH", "ASTR"]);
    assert_eq!(state.pending_listings, 0);
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_survives_exhausted_retries() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 9]);
    mock.fail_next_listings(3);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let state = h.scheduler.bootstrap(Some(curve(3, 4))).await.unwrap();
    let summary = h.scheduler.run(state).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.listings_created, 1);
    assert_eq!(summary.cycles, 2);
    assert_eq!(
        h.clock.sleeps(),
        vec![
            TEN_MINUTES,
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(60)
        ]
    );
}

#[tokio::test]
async fn loop_survives_read_failures() {
    let mock = MemoryMarketplace::new(10);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let mut state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    mock.set_read_error(Some("rpc unavailable"));
    let result = h.scheduler.run_cycle(&mut state).await;
    assert!(matches!(result, Err(ListerError::NetworkRead(_))));

    mock.set_read_error(None);
    mock.script_balances(&[9]);
    h.scheduler.run_cycle(&mut state).await.unwrap();
    assert_eq!(mock.listings().len(), 1);
}

#[tokio::test]
async fn weighted_run_completes_on_empty_balance() {
    let mock = MemoryMarketplace::new(0);
    let mut s = settings(hour_aligned());
    s.initial_listings = 1;
    let mut h = harness(&mock, weighted(), s, at(20, 30), vec![0.5]);

    let state = h.scheduler.bootstrap(None).await.unwrap();
    let summary = h.scheduler.run(state).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.listings_created, 0);
    assert_eq!(summary.cycles, 0);
    assert!(mock.listings().is_empty());
}

#[tokio::test]
async fn bonding_run_completes_at_total_supply() {
    let mock = MemoryMarketplace::new(10);
    mock.script_balances(&[10, 8]);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let state = h.scheduler.bootstrap(Some(curve(664, 666))).await.unwrap();
    let summary = h.scheduler.run(state).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.listings_created, 2);
    let last = mock.listings().last().cloned().unwrap();
    assert_eq!(last.listing_number, 666);
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let mock = MemoryMarketplace::new(10);
    let mut h = harness(&mock, bonding(), settings(fixed_interval()), at(9, 0), vec![0.5]);

    let state = h.scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    h.trigger.trigger();
    let summary = h.scheduler.run(state).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert_eq!(summary.listings_created, 0);
}

#[tokio::test]
async fn dry_run_sends_no_writes() {
    let mock = MemoryMarketplace::new(10);
    mock.set_approved(false);
    mock.script_balances(&[10, 9]);
    let clock = ManualClock::new(at(9, 0));
    let timer = Timer::new(Arc::new(clock.clone()), Shutdown::never());
    let mut scheduler = ListingScheduler::new(
        Arc::new(DryRunMarketplace::new(mock.clone())),
        bonding(),
        settings(fixed_interval()),
        timer,
        Box::new(SequenceRandom::new(vec![0.5])),
    );

    let mut state = scheduler.bootstrap(Some(curve(3, 666))).await.unwrap();
    scheduler.run_cycle(&mut state).await.unwrap();

    assert_eq!(mock.approval_txs(), 0);
    assert!(mock.listings().is_empty());
    assert_eq!(state.listings_created, 1);
}

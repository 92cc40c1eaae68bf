//! Linear bonding curve.
//!
//! Maps units sold to a price between a start and a cap. Prices are
//! rounded to 8 decimal places before they reach the marketplace.

use rust_decimal::Decimal;

/// Decimal places kept on curve prices.
pub const PRICE_SCALE: u32 = 8;

/// Price at `sold_count` on a linear curve from `start_price` to `max_price`.
///
/// `start + (max - start) * sold / total`. A `sold_count` beyond the supply
/// is clamped rather than rejected; callers are expected to stop at the
/// supply. An empty supply prices at the cap.
pub fn linear_price(
    sold_count: u64,
    total_supply: u64,
    start_price: Decimal,
    max_price: Decimal,
) -> Decimal {
    if total_supply == 0 {
        return max_price.round_dp(PRICE_SCALE);
    }
    let sold = Decimal::from(sold_count.min(total_supply));
    let total = Decimal::from(total_supply);
    let price = start_price + (max_price - start_price) * sold / total;
    price.round_dp(PRICE_SCALE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

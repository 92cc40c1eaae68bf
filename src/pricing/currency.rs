//! Currency selection: weighted random draw, forced override and the
//! time-of-day guard.

use tracing::debug;

use crate::error::{ListerError, ListerResult};

/// Tolerance when checking that weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Random source
// ---------------------------------------------------------------------------

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send {
    fn draw(&mut self) -> f64;
}

/// Draws from the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw(&mut self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen::<f64>()
    }
}

/// Replays a fixed sequence of draws, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    draws: Vec<f64>,
    next: usize,
}

impl SequenceRandom {
    pub fn new(draws: Vec<f64>) -> Self {
        Self { draws, next: 0 }
    }
}

impl RandomSource for SequenceRandom {
    fn draw(&mut self) -> f64 {
        if self.draws.is_empty() {
            return 0.0;
        }
        let value = self.draws[self.next % self.draws.len()];
        self.next += 1;
        value
    }
}

// ---------------------------------------------------------------------------
// Weighted choice
// ---------------------------------------------------------------------------

/// Check that weights are non-negative and sum to one.
pub fn validate_weights(weights: &[(String, f64)]) -> ListerResult<()> {
    if weights.is_empty() {
        return Err(ListerError::InvalidConfig("no currency weights configured".into()));
    }
    if let Some((symbol, w)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
        return Err(ListerError::InvalidConfig(format!(
            "weight for {symbol} must be a non-negative number, got {w}"
        )));
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ListerError::InvalidConfig(format!(
            "currency weights must sum to 1, got {sum}"
        )));
    }
    Ok(())
}

/// Pick a currency symbol.
///
/// A `forced` symbol is returned as-is. Otherwise one draw is taken and
/// walked through the cumulative weights in order.
pub fn weighted_choice(
    weights: &[(String, f64)],
    forced: Option<&str>,
    rng: &mut dyn RandomSource,
) -> ListerResult<String> {
    if let Some(symbol) = forced {
        return Ok(symbol.to_string());
    }

    let (last, _) = weights
        .last()
        .ok_or_else(|| ListerError::InvalidConfig("no currency weights configured".into()))?;

    let roll = rng.draw();
    let mut cumulative = 0.0;
    for (symbol, weight) in weights {
        cumulative += weight;
        if roll < cumulative {
            debug!(roll, symbol = %symbol, "Weighted currency draw");
            return Ok(symbol.clone());
        }
    }
    // Float rounding can leave the final bucket a hair short of 1.0.
    Ok(last.clone())
}

// ---------------------------------------------------------------------------
// Daytime guard
// ---------------------------------------------------------------------------

/// Restricts the scheduled listing to one currency during a window of hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaytimeGuard {
    /// First hour of the window (inclusive, 0-23).
    pub start_hour: u32,
    /// End of the window (exclusive, 0-24).
    pub end_hour: u32,
    /// Only currency listed while the window is open.
    pub currency: String,
}

impl DaytimeGuard {
    pub fn is_active(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

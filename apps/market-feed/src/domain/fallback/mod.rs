//! Fallback Source
//!
//! Serves a synthetic snapshot while live data is unavailable.
//!
//! # State Machine
//!
//! ```text
//!            arm                  watchdog / exhausted
//! Disarmed ───────▶ Armed ───────────────────────────▶ Active
//!    ▲                │                                  │
//!    └────────────────┴──────── live update ─────────────┘
//! ```
//!
//! Exhaustion may also jump straight from Disarmed to Active. Shutdown
//! returns to Disarmed and never activates.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;

use super::quote::{Quote, QuoteOrigin};
use super::streaming::Symbol;

// =============================================================================
// State Machine
// =============================================================================

/// Fallback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackState {
    /// Live data flowing; no watchdog running.
    #[default]
    Disarmed,
    /// Watchdog running; waiting for the first live update.
    Armed,
    /// Synthetic data being served.
    Active,
}

impl FallbackState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::Armed => "armed",
            Self::Active => "active",
        }
    }
}

/// Thread-safe holder of the fallback state.
///
/// Every transition method returns whether it changed the state, so the
/// caller performs side effects (installing quotes, cancelling the
/// watchdog) exactly once.
#[derive(Debug, Default)]
pub struct FallbackController {
    state: Mutex<FallbackState>,
}

impl FallbackController {
    /// Create a disarmed controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FallbackState {
        *self.state.lock()
    }

    /// Whether live data is being served.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() != FallbackState::Active
    }

    /// Disarmed → Armed.
    pub fn arm(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FallbackState::Disarmed {
            *state = FallbackState::Armed;
            return true;
        }
        false
    }

    /// Armed → Active, when the watchdog fires.
    pub fn on_watchdog_elapsed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FallbackState::Armed {
            *state = FallbackState::Active;
            return true;
        }
        false
    }

    /// Disarmed or Armed → Active, when reconnection is exhausted.
    pub fn force_active(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FallbackState::Active {
            return false;
        }
        *state = FallbackState::Active;
        true
    }

    /// Armed or Active → Disarmed, on a live update.
    ///
    /// Returns the state that was left, if any.
    pub fn on_live_update(&self) -> Option<FallbackState> {
        let mut state = self.state.lock();
        match *state {
            FallbackState::Disarmed => None,
            previous => {
                *state = FallbackState::Disarmed;
                Some(previous)
            }
        }
    }

    /// Any → Disarmed, on shutdown.
    pub fn disarm(&self) {
        *self.state.lock() = FallbackState::Disarmed;
    }
}

// =============================================================================
// Synthetic Quote Source
// =============================================================================

/// Reference values a synthetic quote is perturbed around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceQuote {
    /// Reference price.
    pub price: Decimal,
    /// Reference 24h change in percent.
    pub change_percent_24h: Decimal,
    /// Reference 24h volume.
    pub volume_24h: Decimal,
}

/// Reference for symbols without a known entry.
const NEUTRAL_REFERENCE: ReferenceQuote = ReferenceQuote {
    price: Decimal::ONE_HUNDRED,
    change_percent_24h: Decimal::ZERO,
    volume_24h: Decimal::from_parts(1_000_000, 0, 0, false, 0),
};

/// Maximum price perturbation in basis points (±0.5%).
const MAX_PERTURBATION_BPS: i64 = 50;

/// Half-width of the synthetic 24h range in basis points (±2%).
const RANGE_BPS: i64 = 200;

/// Generates synthetic quotes for degraded mode.
#[derive(Debug, Clone)]
pub struct FallbackSource {
    references: Vec<(Symbol, ReferenceQuote)>,
}

impl Default for FallbackSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackSource {
    /// Create a source seeded with the built-in reference quotes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            references: vec![
                (
                    "BTCUSDT".to_string(),
                    ReferenceQuote {
                        price: Decimal::new(45_000, 0),
                        change_percent_24h: Decimal::new(25, 1),
                        volume_24h: Decimal::new(28_000_000_000, 0),
                    },
                ),
                (
                    "ETHUSDT".to_string(),
                    ReferenceQuote {
                        price: Decimal::new(3_200, 0),
                        change_percent_24h: Decimal::new(-12, 1),
                        volume_24h: Decimal::new(15_000_000_000, 0),
                    },
                ),
            ],
        }
    }

    /// Add or replace a reference quote.
    #[must_use]
    pub fn with_reference(mut self, symbol: impl Into<Symbol>, reference: ReferenceQuote) -> Self {
        let symbol = symbol.into().to_uppercase();
        self.references.retain(|(s, _)| *s != symbol);
        self.references.push((symbol, reference));
        self
    }

    /// Reference values for a symbol.
    #[must_use]
    pub fn reference(&self, symbol: &str) -> ReferenceQuote {
        self.references
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map_or(NEUTRAL_REFERENCE, |(_, r)| *r)
    }

    /// Generate one synthetic quote per symbol.
    #[must_use]
    pub fn generate(&self, symbols: &[Symbol]) -> Vec<Quote> {
        let mut rng = rand::rng();
        self.generate_with(symbols, &mut rng)
    }

    /// Generate with a caller-supplied RNG.
    pub fn generate_with<R: Rng>(&self, symbols: &[Symbol], rng: &mut R) -> Vec<Quote> {
        let now = Utc::now();
        symbols
            .iter()
            .map(|symbol| {
                let reference = self.reference(symbol);
                let bps = rng.random_range(-MAX_PERTURBATION_BPS..=MAX_PERTURBATION_BPS);
                let price = scale_bps(reference.price, bps);

                Quote {
                    symbol: symbol.to_uppercase(),
                    price,
                    high_24h: scale_bps(reference.price, RANGE_BPS).max(price),
                    low_24h: scale_bps(reference.price, -RANGE_BPS).min(price),
                    volume_24h: reference.volume_24h,
                    change_percent_24h: (reference.change_percent_24h + Decimal::new(bps, 2))
                        .round_dp(2),
                    updated_at: now,
                    origin: QuoteOrigin::Fallback,
                }
            })
            .collect()
    }
}

/// `value * (1 + bps / 10_000)`, rounded to cents.
fn scale_bps(value: Decimal, bps: i64) -> Decimal {
    (value * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn arm_only_from_disarmed() {
        let controller = FallbackController::new();

        assert!(controller.arm());
        assert!(!controller.arm());
        assert_eq!(controller.state(), FallbackState::Armed);
    }

    #[test]
    fn watchdog_activates_only_when_armed() {
        let controller = FallbackController::new();
        assert!(!controller.on_watchdog_elapsed());

        controller.arm();
        assert!(controller.on_watchdog_elapsed());
        assert!(!controller.is_live());
        assert!(!controller.on_watchdog_elapsed());
    }

    #[test]
    fn live_update_disarms_from_armed_and_active() {
        let controller = FallbackController::new();
        controller.arm();
        assert_eq!(controller.on_live_update(), Some(FallbackState::Armed));
        assert_eq!(controller.on_live_update(), None);

        controller.force_active();
        assert_eq!(controller.on_live_update(), Some(FallbackState::Active));
        assert!(controller.is_live());
    }

    #[test]
    fn late_watchdog_after_live_update_is_ignored() {
        let controller = FallbackController::new();
        controller.arm();
        controller.on_live_update();

        assert!(!controller.on_watchdog_elapsed());
        assert_eq!(controller.state(), FallbackState::Disarmed);
    }

    #[test]
    fn force_active_from_any_non_active_state() {
        let controller = FallbackController::new();
        assert!(controller.force_active());
        assert!(!controller.force_active());

        controller.disarm();
        controller.arm();
        assert!(controller.force_active());
    }

    #[test]
    fn disarm_after_active() {
        let controller = FallbackController::new();
        controller.force_active();
        controller.disarm();
        assert_eq!(controller.state(), FallbackState::Disarmed);
        assert!(controller.is_live());
    }

    #[test]
    fn generated_quotes_stay_near_reference() {
        let source = FallbackSource::new();
        let mut rng = StdRng::seed_from_u64(7);

        let quotes = source.generate_with(&["BTCUSDT".to_string(), "ETHUSDT".to_string()], &mut rng);

        assert_eq!(quotes.len(), 2);
        let btc = &quotes[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.origin, QuoteOrigin::Fallback);
        assert!(btc.price >= Decimal::new(44_775, 0) && btc.price <= Decimal::new(45_225, 0));
        assert!(btc.low_24h <= btc.price && btc.price <= btc.high_24h);
        assert_eq!(btc.volume_24h, Decimal::new(28_000_000_000, 0));

        let eth = &quotes[1];
        assert!(eth.change_percent_24h < Decimal::ZERO);
    }

    #[test]
    fn unknown_symbol_gets_neutral_reference() {
        let source = FallbackSource::new();
        let mut rng = StdRng::seed_from_u64(1);

        let quotes = source.generate_with(&["solusdt".to_string()], &mut rng);

        assert_eq!(quotes[0].symbol, "SOLUSDT");
        assert!(quotes[0].price >= Decimal::new(995, 1));
        assert!(quotes[0].price <= Decimal::new(1005, 1));
    }

    #[test]
    fn custom_reference_replaces_builtin() {
        let source = FallbackSource::new().with_reference(
            "btcusdt",
            ReferenceQuote {
                price: Decimal::new(10, 0),
                change_percent_24h: Decimal::ZERO,
                volume_24h: Decimal::ONE,
            },
        );

        assert_eq!(source.reference("BTCUSDT").price, Decimal::new(10, 0));
    }

    #[test]
    fn prices_rounded_to_cents() {
        let source = FallbackSource::new();
        let quotes = source.generate(&["ETHUSDT".to_string()]);
        assert!(quotes[0].price.scale() <= 2);
    }
}

//! Quote Snapshot
//!
//! The latest known market values per symbol and the registry that holds
//! them. The registry is the canonical "current market snapshot" exposed
//! to consumers.
//!
//! # Ownership
//!
//! Each record is owned by whichever source wrote it last. Live and
//! fallback records are never merged field-by-field; a write always
//! replaces the whole record. Ordering is by arrival, not by timestamp.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use super::streaming::Symbol;

/// Where a quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteOrigin {
    /// Received from the live feed.
    Live,
    /// Produced by the fallback source.
    Fallback,
}

/// Latest known market values for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Symbol key.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: Decimal,
    /// 24h high.
    pub high_24h: Decimal,
    /// 24h low.
    pub low_24h: Decimal,
    /// 24h volume.
    pub volume_24h: Decimal,
    /// 24h change in percent.
    pub change_percent_24h: Decimal,
    /// When this record was written.
    pub updated_at: DateTime<Utc>,
    /// Source of the record.
    pub origin: QuoteOrigin,
}

impl Quote {
    /// Whether this record came from the live feed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.origin == QuoteOrigin::Live
    }
}

/// Counts of records by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuoteBookStats {
    /// Records written by the live feed.
    pub live: usize,
    /// Records written by the fallback source.
    pub fallback: usize,
}

/// Thread-safe registry of the latest quote per symbol.
#[derive(Debug, Default)]
pub struct QuoteBook {
    quotes: RwLock<HashMap<Symbol, Quote>>,
}

impl QuoteBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// All quotes, sorted by symbol.
    #[must_use]
    pub fn all(&self) -> Vec<Quote> {
        let mut quotes: Vec<_> = self.quotes.read().values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Number of symbols held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether the book is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Record counts by origin.
    #[must_use]
    pub fn stats(&self) -> QuoteBookStats {
        let quotes = self.quotes.read();
        let live = quotes.values().filter(|q| q.is_live()).count();
        QuoteBookStats {
            live,
            fallback: quotes.len() - live,
        }
    }

    /// Write one live quote, replacing whatever the symbol held.
    ///
    /// Returns the origin of the replaced record, if any.
    pub fn apply_live(&self, quote: Quote) -> Option<QuoteOrigin> {
        debug_assert_eq!(quote.origin, QuoteOrigin::Live);
        self.quotes
            .write()
            .insert(quote.symbol.clone(), quote)
            .map(|previous| previous.origin)
    }

    /// Replace the whole book with a live overview.
    ///
    /// Fallback records are dropped in the same write so readers never see
    /// a mix of the old fallback snapshot and the new overview.
    pub fn apply_live_overview(&self, quotes: Vec<Quote>) {
        let mut book = self.quotes.write();
        book.retain(|_, q| q.is_live());
        for quote in quotes {
            book.insert(quote.symbol.clone(), quote);
        }
    }

    /// Install fallback quotes, replacing existing records for those symbols.
    pub fn install_fallback(&self, quotes: Vec<Quote>) {
        let mut book = self.quotes.write();
        for quote in quotes {
            debug_assert_eq!(quote.origin, QuoteOrigin::Fallback);
            book.insert(quote.symbol.clone(), quote);
        }
    }
}

//! Market Data Types
//!
//! Typed views over the payloads of the market data calls the dashboard
//! uses. These are transient: decoded from an inbound frame, handed to the
//! caller, never cached here.
//!
//! # Wire Formats
//!
//! ```json
//! {"msg_type": "active_symbols", "active_symbols": [{"symbol": "R_50", "exchange_is_open": 1, ...}]}
//! {"msg_type": "exchange_rates", "exchange_rates": {"base_currency": "USD", "date": 1700000000, "rates": {"EUR": 0.92}}}
//! {"msg_type": "tick", "tick": {"symbol": "R_50", "quote": 212.1, "epoch": 1700000000, ...}}
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::frame::OutboundFrame;

// =============================================================================
// Active Symbols
// =============================================================================

/// Level of detail for the `active_symbols` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolsDetail {
    /// Names and market grouping only.
    #[default]
    Brief,
    /// Everything the venue knows.
    Full,
}

impl SymbolsDetail {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Full => "full",
        }
    }
}

/// Product family filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    /// Standard options.
    #[default]
    Basic,
}

impl ProductType {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
        }
    }
}

/// Parameters of an `active_symbols` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSymbolsRequest {
    /// Detail level.
    pub detail: SymbolsDetail,
    /// Product filter.
    pub product_type: ProductType,
    /// Restrict to one landing company.
    pub landing_company: Option<String>,
}

impl ActiveSymbolsRequest {
    /// Build the outbound frame.
    #[must_use]
    pub fn to_frame(&self) -> OutboundFrame {
        let frame = OutboundFrame::new()
            .with("active_symbols", self.detail.as_str())
            .with("product_type", self.product_type.as_str());
        match &self.landing_company {
            Some(company) => frame.with("landing_company", company.as_str()),
            None => frame,
        }
    }
}

/// One tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSymbol {
    /// Venue symbol code, e.g. `R_50`.
    pub symbol: String,
    /// Display name.
    pub display_name: String,
    /// Market code.
    pub market: String,
    /// Market display name.
    pub market_display_name: String,
    /// Submarket code.
    pub submarket: String,
    /// Submarket display name.
    pub submarket_display_name: String,
    /// Symbol type (may be empty).
    #[serde(default)]
    pub symbol_type: String,
    /// Whether the exchange is currently open.
    #[serde(with = "flag")]
    pub exchange_is_open: bool,
    /// Whether trading is suspended.
    #[serde(with = "flag")]
    pub is_trading_suspended: bool,
    /// Pip size.
    #[serde(default)]
    pub pip: Option<Decimal>,
}

// =============================================================================
// Exchange Rates
// =============================================================================

/// Conversion rates from one base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRates {
    /// Base currency code.
    pub base_currency: String,
    /// Time the rates were published.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub date: Option<DateTime<Utc>>,
    /// Target currency code to rate.
    #[serde(default)]
    pub rates: BTreeMap<String, Decimal>,
}

impl ExchangeRates {
    /// Rate for `currency`, if quoted.
    #[must_use]
    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }
}

/// Build an `exchange_rates` request frame.
#[must_use]
pub fn exchange_rates_frame(base_currency: &str, target_currency: Option<&str>) -> OutboundFrame {
    let frame = OutboundFrame::new()
        .with("exchange_rates", 1)
        .with("base_currency", base_currency);
    match target_currency {
        Some(target) => frame.with("target_currency", target),
        None => frame,
    }
}

// =============================================================================
// Ticks
// =============================================================================

/// One price update for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Symbol code.
    pub symbol: String,
    /// Spot quote.
    pub quote: Decimal,
    /// Bid, when the venue publishes one.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Ask, when the venue publishes one.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Quote time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub epoch: DateTime<Utc>,
    /// Venue tick id.
    #[serde(default)]
    pub id: Option<String>,
    /// Decimal places of the quote.
    #[serde(default)]
    pub pip_size: Option<u32>,
}

/// Build a streaming `ticks` request frame.
#[must_use]
pub fn ticks_frame(symbol: &str) -> OutboundFrame {
    OutboundFrame::new().with("ticks", symbol).with("subscribe", 1)
}

/// Build a `forget` frame that cancels a venue-side stream.
#[must_use]
pub fn forget_frame(subscription_id: &str) -> OutboundFrame {
    OutboundFrame::new().with("forget", subscription_id)
}

/// The venue encodes booleans as `0`/`1`.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Bool(value) => value,
            Flag::Int(value) => value != 0,
        })
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }
}

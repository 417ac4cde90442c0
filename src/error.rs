use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{ExchangeId, MarketId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("exchange id mismatch: expected '{expected}', got '{actual}'")]
    ExchangeIdMismatch { expected: ExchangeId, actual: ExchangeId },

    #[error("no market config for market {market} on exchange '{exchange}'")]
    MissingMarketConfig { exchange: ExchangeId, market: MarketId },

    #[error("ticker cannot be empty for market {0}")]
    EmptyTicker(MarketId),

    #[error("adjust-by market {adjust_by} of market {market} has no market config")]
    MissingAdjustMarket { market: MarketId, adjust_by: MarketId },

    #[error("pair cannot be empty for market {0}")]
    EmptyPair(MarketId),

    #[error("min exchanges must be positive for market {0}")]
    ZeroMinExchanges(MarketId),

    #[error("invalid exchange query config for '{exchange}': {reason}")]
    InvalidQueryConfig { exchange: ExchangeId, reason: String },

    #[error("invalid exchange config json for market {market}: {reason}")]
    InvalidExchangeConfigJson { market: MarketId, reason: String },

    #[error("adjust-by market {adjust_by} of market {market} was rejected")]
    RejectedAdjustMarket { market: MarketId, adjust_by: MarketId },

    #[error("market params cannot be nil")]
    MissingMarketParams,

    #[error("duplicate market id {0}")]
    DuplicateMarketId(MarketId),

    #[error("exchange '{0}' is not configured")]
    UnknownExchange(ExchangeId),

    #[error("market {0} is not configured")]
    UnknownMarket(MarketId),

    #[error("no price {kind} registered for exchange '{exchange}'")]
    MissingUpdater { exchange: ExchangeId, kind: &'static str },

    #[error("at least one exchange id is required")]
    NoExchanges,
}

/// Whole-update failure from the config distributor.
#[derive(Debug, Error)]
pub enum UpdateMarketsError {
    /// Nothing was applied.
    #[error("market param validation failed: {0}")]
    Invalid(ConfigError),

    /// The new config was applied but some fetchers or encoders rejected it.
    #[error("failed to update some fetchers or encoders: {}", .failures.join(", "))]
    Notify {
        failures: Vec<String>,
        market_errors: HashMap<MarketId, ConfigError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("at least one market id must be queried")]
    NoMarkets,

    #[error("no market config for market {0}")]
    MissingMarketConfig(MarketId),

    #[error("no market price exponent for market {0}")]
    MissingExponent(MarketId),

    #[error("status 429 - rate limit exceeded")]
    RateLimited,

    #[error("Unexpected response status code of: {0}")]
    UnexpectedStatus(u16),

    #[error("query deadline exceeded")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange '{exchange}' response could not be parsed: {reason}")]
    Exchange { exchange: ExchangeId, reason: String },
}

impl QueryError {
    /// Transient exchange-side failures that are expected to clear by the next cycle.
    pub fn is_generic_exchange_error(&self) -> bool {
        match self {
            QueryError::UnexpectedStatus(_) => true,
            QueryError::Transport(msg) | QueryError::Exchange { reason: msg, .. } => {
                is_generic_exchange_error_message(msg)
            }
            _ => false,
        }
    }
}

fn is_generic_exchange_error_message(msg: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)server sent GOAWAY|internal error|internal_error|unexpected response status code|connection (reset|closed)",
            )
            .expect("static pattern compiles")
        })
        .is_match(msg)
}

/// Per-market result errors forwarded from a fetcher to its encoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid price of 0 for exchange '{exchange}' and market {market}")]
    InvalidZeroPrice { exchange: ExchangeId, market: MarketId },

    #[error("market {market} unavailable: {reason}")]
    Unavailable { market: MarketId, reason: String },

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("no market config for market {market} on exchange '{exchange}'")]
    MissingMarketConfig { exchange: ExchangeId, market: MarketId },

    #[error("no mutable market config for market {0}")]
    MissingMutableMarketConfig(MarketId),

    #[error("no mutable market config for adjust-by market {0}")]
    MissingAdjustMarketConfig(MarketId),

    #[error(
        "insufficient index prices for adjust-by market {adjust_by}: {have} exchanges, need {need}"
    )]
    InsufficientIndexPrices { adjust_by: MarketId, have: usize, need: u32 },

    #[error("converted price overflows a u64 mantissa")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_exchange_errors() {
        let generic = [
            QueryError::Transport("http2: server sent GOAWAY and closed the connection".into()),
            QueryError::Transport("Internal error: something went wrong".into()),
            QueryError::Transport("INTERNAL_ERROR: something went wrong".into()),
            QueryError::Exchange {
                exchange: "Okx".into(),
                reason: "Unexpected response status code of: 5".into(),
            },
            QueryError::UnexpectedStatus(503),
        ];
        for err in generic {
            assert!(err.is_generic_exchange_error(), "{err}");
        }

        assert!(!QueryError::Transport("some other error".into()).is_generic_exchange_error());
        assert!(!QueryError::RateLimited.is_generic_exchange_error());
        assert!(!QueryError::Timeout.is_generic_exchange_error());
    }

    #[test]
    fn test_zero_price_message() {
        let err = FetchError::InvalidZeroPrice {
            exchange: "X".into(),
            market: 7,
        };
        assert_eq!(err.to_string(), "invalid price of 0 for exchange 'X' and market 7");
    }
}

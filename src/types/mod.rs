pub mod exchange_config;
pub mod market_config;
pub mod market_param;

use chrono::{DateTime, Utc};

pub use exchange_config::{ExchangeQueryConfig, MutableExchangeMarketConfig};
pub use market_config::{MarketConfig, MutableMarketConfig};
pub use market_param::MarketParam;

pub type MarketId = u32;
pub type ExchangeId = String;

/// Decimal scale of a price: `value = mantissa * 10^exponent`.
pub type Exponent = i32;

/// Latest price observed for a market, as a mantissa at the market's exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketPriceTimestamp {
    pub market_id: MarketId,
    pub price: u64,
    pub last_updated_at: DateTime<Utc>,
}

impl MarketPriceTimestamp {
    pub fn new(market_id: MarketId, price: u64, last_updated_at: DateTime<Utc>) -> Self {
        Self {
            market_id,
            price,
            last_updated_at,
        }
    }

    pub fn is_newer_than(&self, other: &MarketPriceTimestamp) -> bool {
        self.last_updated_at > other.last_updated_at
    }
}

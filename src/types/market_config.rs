use std::collections::HashMap;

use crate::error::ConfigError;

use super::{Exponent, MarketId};

/// How a single exchange quotes a market.
///
/// Without `adjust_by_market`, `invert` means the exchange quotes the reciprocal
/// of the market. With it, the quote is converted through the adjust-by market's
/// index price: multiplied, or divided into it when `invert` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    pub ticker: String,
    pub adjust_by_market: Option<MarketId>,
    pub invert: bool,
}

impl MarketConfig {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            adjust_by_market: None,
            invert: false,
        }
    }

    pub fn adjusted_by(mut self, market: MarketId) -> Self {
        self.adjust_by_market = Some(market);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn validate(
        &self,
        market_id: MarketId,
        market_configs: &HashMap<MarketId, MutableMarketConfig>,
    ) -> Result<(), ConfigError> {
        if self.ticker.is_empty() {
            return Err(ConfigError::EmptyTicker(market_id));
        }
        if let Some(adjust_by) = self.adjust_by_market {
            if !market_configs.contains_key(&adjust_by) {
                return Err(ConfigError::MissingAdjustMarket {
                    market: market_id,
                    adjust_by,
                });
            }
        }
        Ok(())
    }
}

/// Exchange-independent market metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableMarketConfig {
    pub id: MarketId,
    pub pair: String,
    pub exponent: Exponent,
    pub min_exchanges: u32,
}

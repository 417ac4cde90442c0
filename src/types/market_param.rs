use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::{ExchangeId, Exponent, MarketId};

/// One market record from the inbound config source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParam {
    pub id: MarketId,
    pub pair: String,
    pub exponent: Exponent,
    pub min_exchanges: u32,
    pub exchange_config_json: String,
}

impl MarketParam {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pair.is_empty() {
            return Err(ConfigError::EmptyPair(self.id));
        }
        if self.min_exchanges == 0 {
            return Err(ConfigError::ZeroMinExchanges(self.id));
        }
        if self.exchange_config_json.is_empty() {
            return Err(ConfigError::InvalidExchangeConfigJson {
                market: self.id,
                reason: "exchange config json cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn parse_exchange_config(&self) -> Result<ExchangeConfigJson, ConfigError> {
        serde_json::from_str(&self.exchange_config_json).map_err(|e| {
            ConfigError::InvalidExchangeConfigJson {
                market: self.id,
                reason: e.to_string(),
            }
        })
    }
}

/// `{"exchanges":[{"exchangeName","ticker","adjustByMarket"?,"invert"?}, ...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfigJson {
    pub exchanges: Vec<ExchangeMarketConfigJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExchangeMarketConfigJson {
    pub exchange_name: ExchangeId,
    pub ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_by_market: Option<String>,
    #[serde(default)]
    pub invert: bool,
}

impl ExchangeMarketConfigJson {
    /// Empty strings count as "not set".
    pub fn adjust_by_market(&self) -> Option<&str> {
        self.adjust_by_market.as_deref().filter(|name| !name.is_empty())
    }
}

impl ExchangeConfigJson {
    pub fn validate(
        &self,
        market: MarketId,
        exchange_names: &HashSet<ExchangeId>,
        market_names: &HashMap<String, MarketId>,
    ) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidExchangeConfigJson { market, reason };

        if self.exchanges.is_empty() {
            return Err(invalid("exchanges cannot be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.exchanges.len());
        for exchange in &self.exchanges {
            if !exchange_names.contains(&exchange.exchange_name) {
                return Err(invalid(format!(
                    "exchange name '{}' is not valid",
                    exchange.exchange_name
                )));
            }
            if !seen.insert(exchange.exchange_name.as_str()) {
                return Err(invalid(format!(
                    "duplicate exchange name '{}'",
                    exchange.exchange_name
                )));
            }
            if exchange.ticker.is_empty() {
                return Err(invalid(format!(
                    "ticker cannot be empty for exchange '{}'",
                    exchange.exchange_name
                )));
            }
            if let Some(adjust_by) = exchange.adjust_by_market() {
                if !market_names.contains_key(adjust_by) {
                    return Err(invalid(format!(
                        "adjustByMarket '{}' on exchange '{}' is not a valid market",
                        adjust_by, exchange.exchange_name
                    )));
                }
            }
        }
        Ok(())
    }
}

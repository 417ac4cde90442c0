use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

use super::{ExchangeId, MarketConfig, MarketId, MutableMarketConfig};

/// The markets an exchange supports, keyed by market id, with the per-exchange
/// quoting details for each one. Replaced wholesale on every config change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableExchangeMarketConfig {
    pub id: ExchangeId,
    pub market_to_market_config: HashMap<MarketId, MarketConfig>,
}

impl MutableExchangeMarketConfig {
    pub fn new(id: impl Into<ExchangeId>) -> Self {
        Self {
            id: id.into(),
            market_to_market_config: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_market(mut self, market: MarketId, config: MarketConfig) -> Self {
        self.market_to_market_config.insert(market, config);
        self
    }

    /// Supported market ids in ascending order.
    pub fn market_ids(&self) -> Vec<MarketId> {
        let mut ids: Vec<MarketId> = self.market_to_market_config.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every market on the exchange, and every adjust-by market it references,
    /// must have metadata in `market_configs`.
    pub fn validate(&self, market_configs: &[MutableMarketConfig]) -> Result<(), ConfigError> {
        let by_id: HashMap<MarketId, MutableMarketConfig> = market_configs
            .iter()
            .map(|config| (config.id, config.clone()))
            .collect();

        for (market_id, config) in &self.market_to_market_config {
            if !by_id.contains_key(market_id) {
                return Err(ConfigError::MissingMarketConfig {
                    exchange: self.id.clone(),
                    market: *market_id,
                });
            }
            config.validate(*market_id, &by_id)?;
        }
        Ok(())
    }
}

/// Operational parameters for polling one exchange.
///
/// The same shape doubles as a partial override ("delta") where a zero field
/// means unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct ExchangeQueryConfig {
    pub exchange_id: ExchangeId,
    pub interval_ms: u32,
    pub timeout_ms: u32,
    pub max_queries: u32,
    pub disabled: bool,
}

impl ExchangeQueryConfig {
    pub fn new(
        exchange_id: impl Into<ExchangeId>,
        interval_ms: u32,
        timeout_ms: u32,
        max_queries: u32,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            interval_ms,
            timeout_ms,
            max_queries,
            disabled: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.into())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.into())
    }

    pub fn validate_full(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidQueryConfig {
            exchange: self.exchange_id.clone(),
            reason: reason.to_string(),
        };
        if self.exchange_id.is_empty() {
            return Err(invalid("exchange id cannot be empty"));
        }
        if self.interval_ms == 0 {
            return Err(invalid("interval_ms must be positive"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        if self.max_queries == 0 {
            return Err(invalid("max_queries must be positive"));
        }
        Ok(())
    }

    /// A delta only needs an exchange id; zero fields are left unset.
    pub fn validate_delta(&self) -> Result<(), ConfigError> {
        if self.exchange_id.is_empty() {
            return Err(ConfigError::InvalidQueryConfig {
                exchange: self.exchange_id.clone(),
                reason: "exchange id cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Overlays the non-zero fields of `delta`. `disabled` follows the same
    /// rule: `false` is the unset value, so a delta can disable an exchange but
    /// never re-enable one that is disabled in the base config.
    pub fn apply_delta(&self, delta: &ExchangeQueryConfig) -> ExchangeQueryConfig {
        let pick = |base: u32, over: u32| if over == 0 { base } else { over };
        ExchangeQueryConfig {
            exchange_id: self.exchange_id.clone(),
            interval_ms: pick(self.interval_ms, delta.interval_ms),
            timeout_ms: pick(self.timeout_ms, delta.timeout_ms),
            max_queries: pick(self.max_queries, delta.max_queries),
            disabled: self.disabled || delta.disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(id: MarketId, exponent: i32) -> MutableMarketConfig {
        MutableMarketConfig {
            id,
            pair: format!("M{id}-USD"),
            exponent,
            min_exchanges: 1,
        }
    }

    #[test]
    fn test_market_ids_sorted() {
        let config = MutableExchangeMarketConfig::new("Binance")
            .with_market(9, MarketConfig::new("C"))
            .with_market(7, MarketConfig::new("A"))
            .with_market(8, MarketConfig::new("B"));
        assert_eq!(config.market_ids(), vec![7, 8, 9]);
    }

    #[test]
    fn test_validate_missing_market() {
        let config = MutableExchangeMarketConfig::new("Binance")
            .with_market(7, MarketConfig::new("A"))
            .with_market(8, MarketConfig::new("B"));
        let err = config.validate(&[market(7, -5)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingMarketConfig {
                exchange: "Binance".into(),
                market: 8
            }
        );
    }

    #[test]
    fn test_validate_missing_adjust_market() {
        let config = MutableExchangeMarketConfig::new("Binance")
            .with_market(7, MarketConfig::new("A").adjusted_by(1));
        assert!(config.validate(&[market(7, -5)]).is_err());
        assert!(config.validate(&[market(7, -5), market(1, -9)]).is_ok());
    }

    #[test]
    fn test_deep_equality() {
        let a = MutableExchangeMarketConfig::new("Kraken").with_market(7, MarketConfig::new("A"));
        let mut b = a.clone();
        assert_eq!(a, b);
        b.market_to_market_config
            .insert(7, MarketConfig::new("A").inverted());
        assert_ne!(a, b);
    }

    #[test]
    fn test_query_config_full_validation() {
        assert!(ExchangeQueryConfig::new("Binance", 100, 3_000, 1).validate_full().is_ok());
        assert!(ExchangeQueryConfig::new("Binance", 0, 3_000, 1).validate_full().is_err());
        assert!(ExchangeQueryConfig::new("Binance", 100, 0, 1).validate_full().is_err());
        assert!(ExchangeQueryConfig::new("Binance", 100, 3_000, 0).validate_full().is_err());
        assert!(ExchangeQueryConfig::new("", 100, 3_000, 1).validate_full().is_err());
    }

    #[test]
    fn test_query_config_delta() {
        let base = ExchangeQueryConfig::new("Binance", 2_500, 3_000, 1);
        let delta = ExchangeQueryConfig {
            exchange_id: "Binance".into(),
            timeout_ms: 500,
            ..Default::default()
        };
        assert!(delta.validate_delta().is_ok());
        assert!(delta.validate_full().is_err());

        let merged = base.apply_delta(&delta);
        assert_eq!(merged.interval_ms, 2_500);
        assert_eq!(merged.timeout_ms, 500);
        assert_eq!(merged.max_queries, 1);
        assert!(!merged.disabled);
        assert!(merged.validate_full().is_ok());
    }

    #[test]
    fn test_query_config_delta_only_disables() {
        let mut base = ExchangeQueryConfig::new("Okx", 2_000, 3_000, 1);
        let disable = ExchangeQueryConfig {
            disabled: true,
            ..Default::default()
        };
        assert!(base.apply_delta(&disable).disabled);

        base.disabled = true;
        let unset = ExchangeQueryConfig {
            interval_ms: 500,
            ..Default::default()
        };
        let merged = base.apply_delta(&unset);
        assert!(merged.disabled);
        assert_eq!(merged.interval_ms, 500);
    }
}

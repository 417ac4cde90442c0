use std::collections::HashMap;

use crate::error::ConversionError;
use crate::types::{
    ExchangeId, Exponent, MarketConfig, MarketId, MutableExchangeMarketConfig, MutableMarketConfig,
};

#[derive(Debug)]
pub(super) struct EncoderState {
    exchange_config: MutableExchangeMarketConfig,
    market_configs: HashMap<MarketId, MutableMarketConfig>,
}

/// The configs needed to convert one market's price, copied out of the state.
#[derive(Debug, Clone)]
pub(super) struct ConversionDetails {
    pub market_config: MarketConfig,
    pub exponent: Exponent,
    /// Present when `market_config.adjust_by_market` is set.
    pub adjust_by: Option<MutableMarketConfig>,
}

impl EncoderState {
    pub(super) fn new(
        exchange_config: MutableExchangeMarketConfig,
        market_configs: Vec<MutableMarketConfig>,
    ) -> Self {
        Self {
            exchange_config,
            market_configs: market_configs
                .into_iter()
                .map(|config| (config.id, config))
                .collect(),
        }
    }

    pub(super) fn market_count(&self) -> usize {
        self.exchange_config.market_to_market_config.len()
    }

    pub(super) fn conversion_details(
        &self,
        exchange: &ExchangeId,
        market_id: MarketId,
    ) -> Result<ConversionDetails, ConversionError> {
        let market_config = self
            .exchange_config
            .market_to_market_config
            .get(&market_id)
            .ok_or_else(|| ConversionError::MissingMarketConfig {
                exchange: exchange.clone(),
                market: market_id,
            })?
            .clone();
        let exponent = self
            .market_configs
            .get(&market_id)
            .ok_or(ConversionError::MissingMutableMarketConfig(market_id))?
            .exponent;
        let adjust_by = match market_config.adjust_by_market {
            Some(adjust_id) => Some(
                self.market_configs
                    .get(&adjust_id)
                    .ok_or(ConversionError::MissingAdjustMarketConfig(adjust_id))?
                    .clone(),
            ),
            None => None,
        };

        Ok(ConversionDetails {
            market_config,
            exponent,
            adjust_by,
        })
    }
}

use std::collections::HashMap;

use crate::types::{Exponent, MarketId, MutableExchangeMarketConfig, MutableMarketConfig};

/// Everything a task loop needs, copied out of the fetcher state so no lock is
/// held during network I/O.
#[derive(Debug, Clone)]
pub struct TaskLoopDefinition {
    pub exchange_config: MutableExchangeMarketConfig,
    pub market_exponents: HashMap<MarketId, Exponent>,
    /// Markets to query this cycle.
    pub market_ids: Vec<MarketId>,
}

/// Config, exponents and round-robin cursor. Always replaced as a unit.
#[derive(Debug)]
pub(super) struct FetcherState {
    exchange_config: MutableExchangeMarketConfig,
    market_exponents: HashMap<MarketId, Exponent>,
    market_ids: Vec<MarketId>,
    cursor: usize,
}

impl FetcherState {
    pub(super) fn new(
        exchange_config: MutableExchangeMarketConfig,
        market_configs: &[MutableMarketConfig],
    ) -> Self {
        let market_exponents = market_configs
            .iter()
            .map(|config| (config.id, config.exponent))
            .collect();
        let market_ids = exchange_config.market_ids();
        Self {
            exchange_config,
            market_exponents,
            market_ids,
            cursor: 0,
        }
    }

    pub(super) fn market_ids(&self) -> &[MarketId] {
        &self.market_ids
    }

    /// Multi-market exchanges query every market at once. Single-market
    /// exchanges take the next `max_queries` markets off the cursor, wrapping.
    pub(super) fn task_loop_definition(
        &mut self,
        is_multi_market: bool,
        max_queries: u32,
    ) -> TaskLoopDefinition {
        let market_ids = if is_multi_market {
            self.market_ids.clone()
        } else {
            let count = self.market_ids.len().min(max_queries as usize);
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(self.market_ids[self.cursor]);
                self.cursor = (self.cursor + 1) % self.market_ids.len();
            }
            ids
        };

        TaskLoopDefinition {
            exchange_config: self.exchange_config.clone(),
            market_exponents: self.market_exponents.clone(),
            market_ids,
        }
    }
}

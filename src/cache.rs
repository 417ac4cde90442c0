use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::math::Medianizer;
use crate::types::{ExchangeId, MarketId, MarketPriceTimestamp};

type MarketPrices = RwLock<HashMap<MarketId, MarketPriceTimestamp>>;

/// Latest encoded price per market, per exchange.
///
/// The exchange set is fixed at construction. Each exchange's prices sit
/// behind their own lock so encoders for different exchanges never contend.
#[derive(Debug)]
pub struct ExchangeToMarketPrices {
    exchanges: HashMap<ExchangeId, MarketPrices>,
}

impl ExchangeToMarketPrices {
    pub fn new(exchange_ids: &[ExchangeId]) -> Result<Self, ConfigError> {
        if exchange_ids.is_empty() {
            return Err(ConfigError::NoExchanges);
        }
        let exchanges = exchange_ids
            .iter()
            .map(|id| (id.clone(), RwLock::new(HashMap::new())))
            .collect();
        Ok(Self { exchanges })
    }

    /// Stores `price` unless the cached entry for the same market is at least as new.
    ///
    /// Panics if `exchange_id` was not registered at construction.
    pub fn update_price(&self, exchange_id: &str, price: MarketPriceTimestamp) {
        let Some(prices) = self.exchanges.get(exchange_id) else {
            panic!("exchange '{exchange_id}' is not registered in the price cache");
        };
        let mut prices = prices.write().unwrap_or_else(PoisonError::into_inner);
        match prices.get(&price.market_id) {
            Some(existing) if !price.is_newer_than(existing) => {}
            _ => {
                prices.insert(price.market_id, price);
            }
        }
    }

    /// Median of every exchange's price for `market_id` updated after `cutoff`,
    /// along with how many exchanges contributed. `(0, 0)` if none did.
    pub fn index_price(
        &self,
        market_id: MarketId,
        cutoff: DateTime<Utc>,
        median: Medianizer,
    ) -> (u64, usize) {
        let fresh: Vec<u64> = self
            .exchanges
            .values()
            .filter_map(|prices| {
                let prices = prices.read().unwrap_or_else(PoisonError::into_inner);
                prices
                    .get(&market_id)
                    .filter(|p| p.last_updated_at > cutoff)
                    .map(|p| p.price)
            })
            .collect();

        match median(&fresh) {
            Some(price) => (price, fresh.len()),
            None => (0, 0),
        }
    }

    pub fn all_prices(&self) -> HashMap<ExchangeId, Vec<MarketPriceTimestamp>> {
        self.exchanges
            .iter()
            .map(|(id, prices)| {
                let prices = prices.read().unwrap_or_else(PoisonError::into_inner);
                let mut snapshot: Vec<MarketPriceTimestamp> = prices.values().copied().collect();
                snapshot.sort_unstable_by_key(|p| p.market_id);
                (id.clone(), snapshot)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::math::median;

    fn exchanges() -> Vec<ExchangeId> {
        vec!["Binance".into(), "Kraken".into(), "Okx".into()]
    }

    #[test]
    fn test_requires_exchanges() {
        assert_eq!(
            ExchangeToMarketPrices::new(&[]).unwrap_err(),
            ConfigError::NoExchanges
        );
    }

    #[test]
    fn test_update_price_keeps_newest() {
        let cache = ExchangeToMarketPrices::new(&exchanges()).unwrap();
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);

        // newer first, then older: older must not win
        cache.update_price("Binance", MarketPriceTimestamp::new(7, 200, t2));
        cache.update_price("Binance", MarketPriceTimestamp::new(7, 100, t1));
        assert_eq!(cache.all_prices()["Binance"], vec![MarketPriceTimestamp::new(7, 200, t2)]);

        // ties keep the existing value
        cache.update_price("Binance", MarketPriceTimestamp::new(7, 300, t2));
        assert_eq!(cache.all_prices()["Binance"][0].price, 200);

        let cache = ExchangeToMarketPrices::new(&exchanges()).unwrap();
        cache.update_price("Kraken", MarketPriceTimestamp::new(7, 100, t1));
        cache.update_price("Kraken", MarketPriceTimestamp::new(7, 200, t2));
        assert_eq!(cache.all_prices()["Kraken"][0].price, 200);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_update_unknown_exchange_panics() {
        let cache = ExchangeToMarketPrices::new(&exchanges()).unwrap();
        cache.update_price("Bitstamp", MarketPriceTimestamp::new(7, 100, Utc::now()));
    }

    #[test]
    fn test_index_price() {
        let cache = ExchangeToMarketPrices::new(&exchanges()).unwrap();
        let now = Utc::now();
        let cutoff = now - Duration::seconds(30);

        assert_eq!(cache.index_price(7, cutoff, median), (0, 0));

        cache.update_price("Binance", MarketPriceTimestamp::new(7, 100, now));
        cache.update_price("Kraken", MarketPriceTimestamp::new(7, 300, now));
        // stale sample does not count
        cache.update_price("Okx", MarketPriceTimestamp::new(7, 1_000, now - Duration::seconds(60)));
        // other markets are ignored
        cache.update_price("Okx", MarketPriceTimestamp::new(8, 5, now));

        assert_eq!(cache.index_price(7, cutoff, median), (200, 2));
        assert_eq!(cache.index_price(8, cutoff, median), (5, 1));
        assert_eq!(cache.index_price(9, cutoff, median), (0, 0));
    }

    #[test]
    fn test_all_prices_snapshot() {
        let cache = ExchangeToMarketPrices::new(&exchanges()).unwrap();
        let now = Utc::now();
        cache.update_price("Okx", MarketPriceTimestamp::new(9, 1, now));
        cache.update_price("Okx", MarketPriceTimestamp::new(8, 2, now));

        let snapshot = cache.all_prices();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot["Binance"].is_empty());
        let ids: Vec<MarketId> = snapshot["Okx"].iter().map(|p| p.market_id).collect();
        assert_eq!(ids, vec![8, 9]);

        // the snapshot is a copy
        cache.update_price("Okx", MarketPriceTimestamp::new(8, 3, now + Duration::seconds(1)));
        assert_eq!(snapshot["Okx"][0].price, 2);
    }
}

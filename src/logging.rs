use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::ExchangeToMarketPrices;
use crate::distributor::ConfigDistributor;
use crate::math;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Periodically logs every cached price, rendered with its market's exponent.
pub fn spawn_price_reporter(
    prices: Arc<ExchangeToMarketPrices>,
    distributor: Arc<ConfigDistributor>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let snapshot: BTreeMap<_, _> = prices.all_prices().into_iter().collect();
            let total: usize = snapshot.values().map(Vec::len).sum();
            if total == 0 {
                info!(event = "PRICES", "no prices encoded yet");
                continue;
            }

            for (exchange, exchange_prices) in snapshot {
                for price in exchange_prices {
                    let market = match distributor.market_config_copies(&[price.market_id]) {
                        Ok(mut configs) if !configs.is_empty() => configs.swap_remove(0),
                        // market removed since the price was cached
                        _ => {
                            warn!(exchange = %exchange, market = price.market_id, "no market config for cached price");
                            continue;
                        }
                    };
                    info!(
                        event = "PRICE",
                        exchange = %exchange,
                        pair = %market.pair,
                        price = %format!("{:.6}", math::price_to_f64(price.price, market.exponent)),
                        age_ms = (chrono::Utc::now() - price.last_updated_at).num_milliseconds(),
                    );
                }
            }
        }
    })
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::ExchangeToMarketPrices;
use crate::config::{load_market_params, DaemonConfig};
use crate::distributor::ConfigDistributor;
use crate::encoder::PriceEncoder;
use crate::feeds::ExchangeStartupConfig;
use crate::fetcher::PriceFetcher;
use crate::handler::ExchangeQueryHandler;
use crate::transport::Transport;
use crate::types::ExchangeId;

pub struct Daemon {
    pub distributor: Arc<ConfigDistributor>,
    pub prices: Arc<ExchangeToMarketPrices>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Wires one fetcher and one encoder per exchange around a shared price cache
/// and registers both with the config distributor. Must run inside a tokio runtime.
pub fn start(
    cfg: &DaemonConfig,
    exchanges: Vec<ExchangeStartupConfig>,
    transport: Arc<dyn Transport>,
    query_handler: Arc<dyn ExchangeQueryHandler>,
) -> Result<Daemon> {
    let ids: Vec<ExchangeId> = exchanges
        .iter()
        .map(|e| e.details.exchange.clone())
        .collect();
    let prices = Arc::new(ExchangeToMarketPrices::new(&ids)?);
    let distributor = Arc::new(ConfigDistributor::new(&ids));
    let mut tasks = Vec::with_capacity(exchanges.len() * 2);

    for exchange in exchanges {
        let id = exchange.details.exchange.clone();
        let exchange_config = distributor.exchange_market_config_copy(&id)?;
        let market_configs = distributor.market_config_copies(&exchange_config.market_ids())?;
        let (tx, rx) = mpsc::channel(cfg.buffer_size);

        let encoder = Arc::new(PriceEncoder::new(
            exchange_config.clone(),
            market_configs.clone(),
            prices.clone(),
            cfg.max_price_age(),
            cfg.startup_grace_period(),
        )?);
        distributor.add_price_encoder(encoder.clone());
        tasks.push(encoder.spawn(rx));

        let disabled = exchange.query_config.disabled;
        let fetcher = Arc::new(PriceFetcher::new(
            exchange.query_config,
            exchange.details,
            exchange_config,
            &market_configs,
            query_handler.clone(),
            tx,
        )?);
        distributor.add_price_fetcher(fetcher.clone());
        tasks.push(fetcher.spawn(transport.clone()));

        info!(exchange = %id, disabled, "price fetcher and encoder started");
    }

    Ok(Daemon {
        distributor,
        prices,
        tasks,
    })
}

/// Re-reads the market-param file on an interval and pushes it through the distributor.
pub fn spawn_market_param_updater(
    distributor: Arc<ConfigDistributor>,
    path: String,
    every: Duration,
    grace_period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            update_market_params(&distributor, &path, started.elapsed() >= grace_period);
        }
    })
}

pub fn update_market_params(distributor: &ConfigDistributor, path: &str, past_grace_period: bool) {
    let params = match load_market_params(path) {
        Ok(params) => params,
        Err(e) => {
            // the param source is often not ready yet right after startup
            if past_grace_period {
                error!(error = %format!("{e:#}"), "failed to load market params");
            } else {
                info!(error = %format!("{e:#}"), "failed to load market params");
            }
            return;
        }
    };

    match distributor.update_markets(Some(&params[..])) {
        Ok(rejected) if rejected.is_empty() => {
            info!(markets = params.len(), "market params applied");
        }
        Ok(rejected) => {
            error!(markets = params.len(), rejected = ?rejected, "failed to apply some market updates");
        }
        Err(e) => {
            error!(error = %e, "failed to apply all market updates");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::feeds::{kraken, KRAKEN};
    use crate::handler::{ExchangeQueryDetails, QueryHandler};
    use crate::transport::HttpResponse;
    use crate::types::ExchangeQueryConfig;

    struct StaticTransport(&'static str);

    #[async_trait]
    impl Transport for StaticTransport {
        async fn get(&self, _url: &str) -> anyhow::Result<HttpResponse> {
            Ok(HttpResponse::new(200, self.0))
        }
    }

    const KRAKEN_BODY: &str = r#"{"error":[],"result":{
        "XXBTZUSD":{"a":["29204.5"],"b":["29203.0"],"c":["29203.1"]},
        "USDTZUSD":{"a":["0.99980"],"b":["0.99970"],"c":["0.999765"]}
    }}"#;

    fn kraken_exchange(interval_ms: u32) -> ExchangeStartupConfig {
        ExchangeStartupConfig {
            details: ExchangeQueryDetails {
                exchange: KRAKEN.into(),
                url: kraken::URL.into(),
                price_function: Arc::new(kraken::KrakenPriceFunction),
                is_multi_market: true,
            },
            query_config: ExchangeQueryConfig::new(KRAKEN, interval_ms, 1_000, 1),
        }
    }

    fn write_params(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.json", std::process::id()));
        let params = serde_json::json!([
            {
                "id": 0, "pair": "BTC-USD", "exponent": -5, "min_exchanges": 1,
                "exchange_config_json": r#"{"exchanges":[{"exchangeName":"Kraken","ticker":"XXBTZUSD"}]}"#
            },
            {
                "id": 1, "pair": "USDT-USD", "exponent": -9, "min_exchanges": 1,
                "exchange_config_json": r#"{"exchanges":[{"exchangeName":"Kraken","ticker":"USDTZUSD"}]}"#
            }
        ]);
        std::fs::write(&path, params.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_prices_flow_into_cache() {
        let daemon = start(
            &DaemonConfig::default(),
            vec![kraken_exchange(10)],
            Arc::new(StaticTransport(KRAKEN_BODY)),
            Arc::new(QueryHandler),
        )
        .unwrap();

        let path = write_params("pricefeed-flow");
        update_market_params(&daemon.distributor, path.to_str().unwrap(), true);
        assert_eq!(
            daemon
                .distributor
                .exchange_market_config_copy(KRAKEN)
                .unwrap()
                .market_ids(),
            vec![0, 1]
        );

        let mut cached = Vec::new();
        for _ in 0..200 {
            cached = daemon.prices.all_prices()[KRAKEN].clone();
            if cached.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        std::fs::remove_file(path).ok();

        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].price, 2_920_310_000);
        assert_eq!(cached[1].price, 999_765_000);
    }

    #[tokio::test]
    async fn test_disabled_exchange_never_queries() {
        let mut exchange = kraken_exchange(10);
        exchange.query_config.disabled = true;
        let daemon = start(
            &DaemonConfig::default(),
            vec![exchange],
            Arc::new(StaticTransport(KRAKEN_BODY)),
            Arc::new(QueryHandler),
        )
        .unwrap();

        // config distribution still reaches the registered updaters
        let path = write_params("pricefeed-disabled");
        update_market_params(&daemon.distributor, path.to_str().unwrap(), true);
        std::fs::remove_file(path).ok();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(daemon.prices.all_prices()[KRAKEN].is_empty());
    }

    #[tokio::test]
    async fn test_missing_market_params_file_is_not_fatal() {
        let daemon = start(
            &DaemonConfig::default(),
            vec![kraken_exchange(1_000)],
            Arc::new(StaticTransport(KRAKEN_BODY)),
            Arc::new(QueryHandler),
        )
        .unwrap();
        update_market_params(&daemon.distributor, "/nonexistent/market_params.json", false);
        assert!(daemon
            .distributor
            .exchange_market_config_copy(KRAKEN)
            .unwrap()
            .market_to_market_config
            .is_empty());
    }
}

mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::distributor::ExchangeConfigUpdater;
use crate::error::{ConfigError, FetchError};
use crate::handler::{ExchangeQueryDetails, ExchangeQueryHandler};
use crate::transport::Transport;
use crate::types::{
    ExchangeQueryConfig, MarketId, MarketPriceTimestamp, MutableExchangeMarketConfig,
    MutableMarketConfig,
};

use state::FetcherState;
pub use state::TaskLoopDefinition;

/// One item on the fetcher -> encoder queue.
pub type FetchResult = Result<MarketPriceTimestamp, FetchError>;

/// Polls one exchange on its configured interval and forwards every price or
/// failure to that exchange's encoder.
pub struct PriceFetcher {
    query_config: ExchangeQueryConfig,
    query_details: ExchangeQueryDetails,
    query_handler: Arc<dyn ExchangeQueryHandler>,
    state: Mutex<FetcherState>,
    tx: mpsc::Sender<FetchResult>,
}

impl PriceFetcher {
    pub fn new(
        query_config: ExchangeQueryConfig,
        query_details: ExchangeQueryDetails,
        exchange_config: MutableExchangeMarketConfig,
        market_configs: &[MutableMarketConfig],
        query_handler: Arc<dyn ExchangeQueryHandler>,
        tx: mpsc::Sender<FetchResult>,
    ) -> Result<Self, ConfigError> {
        query_config.validate_full()?;
        for actual in [&query_details.exchange, &exchange_config.id] {
            if *actual != query_config.exchange_id {
                return Err(ConfigError::ExchangeIdMismatch {
                    expected: query_config.exchange_id.clone(),
                    actual: actual.clone(),
                });
            }
        }
        exchange_config.validate(market_configs)?;

        Ok(Self {
            state: Mutex::new(FetcherState::new(exchange_config, market_configs)),
            query_config,
            query_details,
            query_handler,
            tx,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, FetcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of what the next cycle will query. Advances the cursor.
    pub fn task_loop_definition(&self) -> TaskLoopDefinition {
        self.lock_state().task_loop_definition(
            self.query_details.is_multi_market,
            self.query_config.max_queries,
        )
    }

    /// One polling cycle. Returns once every subtask has reported.
    pub async fn run_task_loop(&self, transport: &dyn Transport) {
        let definition = self.task_loop_definition();
        if definition.market_ids.is_empty() {
            debug!(exchange = %self.query_config.exchange_id, "no markets to query");
            return;
        }

        if self.query_details.is_multi_market {
            self.run_subtask(&definition, &definition.market_ids, transport)
                .await;
        } else {
            join_all(
                definition
                    .market_ids
                    .iter()
                    .map(|id| self.run_subtask(&definition, std::slice::from_ref(id), transport)),
            )
            .await;
        }
    }

    async fn run_subtask(
        &self,
        definition: &TaskLoopDefinition,
        market_ids: &[MarketId],
        transport: &dyn Transport,
    ) {
        let deadline = Instant::now() + self.query_config.timeout();
        let result = self
            .query_handler
            .query(
                deadline,
                &self.query_details,
                &definition.exchange_config,
                market_ids,
                transport,
                &definition.market_exponents,
            )
            .await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.send(Err(e.into())).await;
                return;
            }
        };

        for price in result.prices {
            if price.price == 0 {
                self.send(Err(FetchError::InvalidZeroPrice {
                    exchange: self.query_config.exchange_id.clone(),
                    market: price.market_id,
                }))
                .await;
            } else {
                self.send(Ok(price)).await;
            }
        }

        let mut unavailable: Vec<_> = result.unavailable.into_iter().collect();
        unavailable.sort_unstable_by_key(|(market, _)| *market);
        for (market, reason) in unavailable {
            self.send(Err(FetchError::Unavailable {
                market,
                reason: format!("{reason:#}"),
            }))
            .await;
        }
    }

    async fn send(&self, result: FetchResult) {
        if self.tx.capacity() == 0 {
            error!(
                exchange = %self.query_config.exchange_id,
                buffer_size = self.tx.max_capacity(),
                "price fetcher buffer is full, send will block"
            );
        }
        if self.tx.send(result).await.is_err() {
            warn!(exchange = %self.query_config.exchange_id, "price encoder stopped, dropping result");
        }
    }

    /// Runs task loops on the configured interval until the process exits.
    /// A disabled exchange never queries.
    pub async fn run(self: Arc<Self>, transport: Arc<dyn Transport>) {
        if self.query_config.disabled {
            info!(exchange = %self.query_config.exchange_id, "exchange disabled, not querying");
            return;
        }

        let mut ticker = tokio::time::interval(self.query_config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_task_loop(transport.as_ref()).await;
        }
    }

    pub fn spawn(self: Arc<Self>, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        tokio::spawn(self.run(transport))
    }
}

impl ExchangeConfigUpdater for PriceFetcher {
    fn exchange_id(&self) -> &str {
        &self.query_config.exchange_id
    }

    fn update_config(
        &self,
        exchange_config: MutableExchangeMarketConfig,
        market_configs: Vec<MutableMarketConfig>,
    ) -> Result<(), ConfigError> {
        if exchange_config.id != self.query_config.exchange_id {
            return Err(ConfigError::ExchangeIdMismatch {
                expected: self.query_config.exchange_id.clone(),
                actual: exchange_config.id,
            });
        }
        exchange_config.validate(&market_configs)?;

        let next = FetcherState::new(exchange_config, &market_configs);
        let markets = next.market_ids().len();
        *self.lock_state() = next;

        info!(exchange = %self.query_config.exchange_id, markets, "price fetcher config updated");
        Ok(())
    }
}

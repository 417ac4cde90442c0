mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};

use crate::cache::ExchangeToMarketPrices;
use crate::distributor::ExchangeConfigUpdater;
use crate::error::{ConfigError, ConversionError, FetchError, QueryError};
use crate::fetcher::FetchResult;
use crate::math::{self, median};
use crate::types::{ExchangeId, MarketId, MarketPriceTimestamp, MutableExchangeMarketConfig, MutableMarketConfig};

use state::EncoderState;

/// Converts one exchange's raw prices to the market's USD price and writes
/// them to the shared cache.
pub struct PriceEncoder {
    exchange_id: ExchangeId,
    state: Mutex<EncoderState>,
    prices: Arc<ExchangeToMarketPrices>,
    max_price_age: Duration,
    created_at: Instant,
    grace_period: Duration,
}

impl PriceEncoder {
    pub fn new(
        exchange_config: MutableExchangeMarketConfig,
        market_configs: Vec<MutableMarketConfig>,
        prices: Arc<ExchangeToMarketPrices>,
        max_price_age: Duration,
        grace_period: Duration,
    ) -> Result<Self, ConfigError> {
        exchange_config.validate(&market_configs)?;
        Ok(Self {
            exchange_id: exchange_config.id.clone(),
            state: Mutex::new(EncoderState::new(exchange_config, market_configs)),
            prices,
            max_price_age,
            created_at: Instant::now(),
            grace_period,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_past_grace_period(&self) -> bool {
        self.created_at.elapsed() >= self.grace_period
    }

    /// Re-expresses `price` as the market's USD price at the market's exponent.
    ///
    /// Adjusted markets read the adjust-by market's index price from the
    /// shared cache and fail if too few exchanges have a fresh sample.
    pub fn convert_price(
        &self,
        price: MarketPriceTimestamp,
    ) -> Result<MarketPriceTimestamp, ConversionError> {
        let details = self
            .lock_state()
            .conversion_details(&self.exchange_id, price.market_id)?;
        let invert = details.market_config.invert;

        let converted = match details.adjust_by {
            None if invert => math::invert(price.price, details.exponent)?,
            None => price.price,
            Some(adjust_by) => {
                let cutoff = Utc::now()
                    - chrono::Duration::milliseconds(self.max_price_age.as_millis() as i64);
                let (index_price, exchanges) =
                    self.prices.index_price(adjust_by.id, cutoff, median);
                if exchanges < adjust_by.min_exchanges as usize {
                    return Err(ConversionError::InsufficientIndexPrices {
                        adjust_by: adjust_by.id,
                        have: exchanges,
                        need: adjust_by.min_exchanges,
                    });
                }
                if invert {
                    math::divide(index_price, adjust_by.exponent, price.price, details.exponent)?
                } else {
                    math::multiply(price.price, details.exponent, index_price, adjust_by.exponent)?
                }
            }
        };

        Ok(MarketPriceTimestamp::new(
            price.market_id,
            converted,
            price.last_updated_at,
        ))
    }

    /// Converts and caches a price, or logs why it could not be.
    pub fn process_fetch_result(&self, result: FetchResult) {
        let price = match result {
            Ok(price) => price,
            Err(e) => {
                let level = fetch_failure_level(&e, self.is_past_grace_period());
                self.log_failure(level, fetch_error_market(&e), &e);
                return;
            }
        };

        match self.convert_price(price) {
            Ok(converted) => {
                debug!(
                    exchange = %self.exchange_id,
                    market = converted.market_id,
                    price = converted.price,
                    "encoded price"
                );
                self.prices.update_price(&self.exchange_id, converted);
            }
            Err(e) => {
                let level = if self.is_past_grace_period() {
                    Level::ERROR
                } else {
                    Level::INFO
                };
                self.log_failure(level, Some(price.market_id), &e);
            }
        }
    }

    fn log_failure(&self, level: Level, market: Option<MarketId>, err: &dyn std::fmt::Display) {
        let exchange = self.exchange_id.as_str();
        if level == Level::ERROR {
            error!(exchange, ?market, error = %err, "failed to encode price");
        } else if level == Level::WARN {
            warn!(exchange, ?market, error = %err, "failed to encode price");
        } else if level == Level::INFO {
            info!(exchange, ?market, error = %err, "failed to encode price");
        } else {
            debug!(exchange, ?market, error = %err, "failed to encode price");
        }
    }

    /// Consumes the fetcher queue in order until every sender is gone.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<FetchResult>) {
        while let Some(result) = rx.recv().await {
            self.process_fetch_result(result);
        }
        warn!(exchange = %self.exchange_id, "price fetcher channel closed, encoder stopping");
    }

    pub fn spawn(self: Arc<Self>, rx: mpsc::Receiver<FetchResult>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }
}

/// Log severity for a failure reported by the fetcher. Transient exchange
/// trouble stays quiet; anything else escalates once the grace period is over.
pub fn fetch_failure_level(err: &FetchError, past_grace_period: bool) -> Level {
    match err {
        FetchError::Query(QueryError::Timeout) => Level::DEBUG,
        FetchError::Query(QueryError::RateLimited) => Level::WARN,
        FetchError::Query(q) if q.is_generic_exchange_error() => Level::INFO,
        _ if past_grace_period => Level::ERROR,
        _ => Level::INFO,
    }
}

fn fetch_error_market(err: &FetchError) -> Option<MarketId> {
    match err {
        FetchError::InvalidZeroPrice { market, .. } | FetchError::Unavailable { market, .. } => {
            Some(*market)
        }
        FetchError::Query(_) => None,
    }
}

impl ExchangeConfigUpdater for PriceEncoder {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn update_config(
        &self,
        exchange_config: MutableExchangeMarketConfig,
        market_configs: Vec<MutableMarketConfig>,
    ) -> Result<(), ConfigError> {
        if exchange_config.id != self.exchange_id {
            return Err(ConfigError::ExchangeIdMismatch {
                expected: self.exchange_id.clone(),
                actual: exchange_config.id,
            });
        }
        exchange_config.validate(&market_configs)?;

        let next = EncoderState::new(exchange_config, market_configs);
        let markets = next.market_count();
        *self.lock_state() = next;

        info!(exchange = %self.exchange_id, markets, "price encoder config updated");
        Ok(())
    }
}

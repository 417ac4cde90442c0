use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::error::QueryError;
use crate::math::{median, Medianizer};
use crate::transport::{HttpResponse, Transport};
use crate::types::{ExchangeId, Exponent, MarketId, MarketPriceTimestamp, MutableExchangeMarketConfig};

/// Replaced in an exchange's url template with the comma-joined tickers being queried.
pub const URL_PLACEHOLDER: &str = "$";

/// Ticker-keyed output of a price function.
#[derive(Debug, Default)]
pub struct ParsedPrices {
    pub prices: HashMap<String, u64>,
    /// Tickers present in the response but not usable, e.g. no liquidity.
    pub unavailable: HashMap<String, anyhow::Error>,
}

/// Turns one exchange response into mantissas at each ticker's exponent.
///
/// An `Err` means the whole response was unusable.
pub trait PriceFunction: Send + Sync {
    fn parse(
        &self,
        response: &HttpResponse,
        ticker_exponents: &HashMap<String, Exponent>,
        median: Medianizer,
    ) -> anyhow::Result<ParsedPrices>;
}

/// Static per-exchange query details.
#[derive(Clone)]
pub struct ExchangeQueryDetails {
    pub exchange: ExchangeId,
    pub url: String,
    pub price_function: Arc<dyn PriceFunction>,
    /// Whether one request can cover every market on the exchange.
    pub is_multi_market: bool,
}

impl fmt::Debug for ExchangeQueryDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeQueryDetails")
            .field("exchange", &self.exchange)
            .field("url", &self.url)
            .field("is_multi_market", &self.is_multi_market)
            .finish()
    }
}

/// Market-keyed output of one query.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub prices: Vec<MarketPriceTimestamp>,
    pub unavailable: HashMap<MarketId, anyhow::Error>,
}

#[async_trait]
pub trait ExchangeQueryHandler: Send + Sync {
    async fn query(
        &self,
        deadline: Instant,
        details: &ExchangeQueryDetails,
        exchange_config: &MutableExchangeMarketConfig,
        market_ids: &[MarketId],
        transport: &dyn Transport,
        market_exponents: &HashMap<MarketId, Exponent>,
    ) -> Result<QueryResult, QueryError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryHandler;

#[async_trait]
impl ExchangeQueryHandler for QueryHandler {
    async fn query(
        &self,
        deadline: Instant,
        details: &ExchangeQueryDetails,
        exchange_config: &MutableExchangeMarketConfig,
        market_ids: &[MarketId],
        transport: &dyn Transport,
        market_exponents: &HashMap<MarketId, Exponent>,
    ) -> Result<QueryResult, QueryError> {
        if market_ids.is_empty() {
            return Err(QueryError::NoMarkets);
        }

        let mut tickers = Vec::with_capacity(market_ids.len());
        let mut ticker_to_market = HashMap::with_capacity(market_ids.len());
        let mut ticker_exponents = HashMap::with_capacity(market_ids.len());
        for &market_id in market_ids {
            let config = exchange_config
                .market_to_market_config
                .get(&market_id)
                .ok_or(QueryError::MissingMarketConfig(market_id))?;
            let exponent = *market_exponents
                .get(&market_id)
                .ok_or(QueryError::MissingExponent(market_id))?;
            tickers.push(config.ticker.as_str());
            ticker_to_market.insert(config.ticker.clone(), market_id);
            ticker_exponents.insert(config.ticker.clone(), exponent);
        }

        let url = details.url.replace(URL_PLACEHOLDER, &tickers.join(","));
        let response = match tokio::time::timeout_at(deadline, transport.get(&url)).await {
            Err(_) => return Err(QueryError::Timeout),
            Ok(Err(e)) => return Err(QueryError::Transport(format!("{e:#}"))),
            Ok(Ok(response)) => response,
        };

        if response.status == 429 {
            return Err(QueryError::RateLimited);
        }
        if !response.is_success() {
            return Err(QueryError::UnexpectedStatus(response.status));
        }

        let parsed = details
            .price_function
            .parse(&response, &ticker_exponents, median)
            .map_err(|e| QueryError::Exchange {
                exchange: details.exchange.clone(),
                reason: format!("{e:#}"),
            })?;

        let lookup = |ticker: &str| -> MarketId {
            match ticker_to_market.get(ticker) {
                Some(id) => *id,
                None => panic!(
                    "severe unexpected error: no market id for ticker '{ticker}' on exchange '{}'",
                    details.exchange
                ),
            }
        };

        let now = Utc::now();
        let mut prices: Vec<MarketPriceTimestamp> = parsed
            .prices
            .iter()
            .map(|(ticker, price)| MarketPriceTimestamp::new(lookup(ticker), *price, now))
            .collect();
        prices.sort_unstable_by_key(|p| p.market_id);

        let unavailable = parsed
            .unavailable
            .into_iter()
            .map(|(ticker, err)| (lookup(&ticker), err))
            .collect();

        Ok(QueryResult {
            prices,
            unavailable,
        })
    }
}

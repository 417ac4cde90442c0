pub mod binance;
pub mod coinbase;
pub mod kraken;
pub mod okx;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::handler::{ExchangeQueryDetails, ParsedPrices};
use crate::math::Medianizer;
use crate::types::{ExchangeQueryConfig, Exponent};

pub const BINANCE: &str = "Binance";
pub const COINBASE: &str = "Coinbase";
pub const KRAKEN: &str = "Kraken";
pub const OKX: &str = "Okx";

/// How the daemon reaches one exchange before any overrides are applied.
#[derive(Debug, Clone)]
pub struct ExchangeStartupConfig {
    pub details: ExchangeQueryDetails,
    pub query_config: ExchangeQueryConfig,
}

/// Every exchange the daemon knows how to query.
pub fn exchange_table() -> Vec<ExchangeStartupConfig> {
    vec![
        startup(BINANCE, binance::URL, Arc::new(binance::BinancePriceFunction), true, 2_500, 1),
        startup(COINBASE, coinbase::URL, Arc::new(coinbase::CoinbasePriceFunction), false, 2_000, 3),
        startup(KRAKEN, kraken::URL, Arc::new(kraken::KrakenPriceFunction), true, 2_000, 1),
        startup(OKX, okx::URL, Arc::new(okx::OkxPriceFunction), true, 2_000, 1),
    ]
}

fn startup(
    exchange: &str,
    url: &str,
    price_function: Arc<dyn crate::handler::PriceFunction>,
    is_multi_market: bool,
    interval_ms: u32,
    max_queries: u32,
) -> ExchangeStartupConfig {
    ExchangeStartupConfig {
        details: ExchangeQueryDetails {
            exchange: exchange.to_string(),
            url: url.to_string(),
            price_function,
            is_multi_market,
        },
        query_config: ExchangeQueryConfig::new(exchange, interval_ms, 3_000, max_queries),
    }
}

/// Truncates a decimal quote to an integer mantissa at `exponent`.
pub fn decimal_to_mantissa(value: Decimal, exponent: Exponent) -> anyhow::Result<u64> {
    if value.is_sign_negative() {
        bail!("negative price {value}");
    }
    let scale = Decimal::from(
        10u64
            .checked_pow(exponent.unsigned_abs())
            .ok_or_else(|| anyhow!("exponent {exponent} out of range"))?,
    );
    let scaled = if exponent <= 0 {
        value.checked_mul(scale)
    } else {
        value.checked_div(scale)
    }
    .ok_or_else(|| anyhow!("price {value} overflows at exponent {exponent}"))?;
    scaled
        .trunc()
        .to_u64()
        .ok_or_else(|| anyhow!("price {value} overflows at exponent {exponent}"))
}

/// Median of the given quotes after converting each to a mantissa.
pub fn median_quote(quotes: &[&str], exponent: Exponent, median: Medianizer) -> anyhow::Result<u64> {
    let mantissas = quotes
        .iter()
        .map(|quote| {
            let value: Decimal = quote
                .parse()
                .with_context(|| format!("invalid quote '{quote}'"))?;
            decimal_to_mantissa(value, exponent)
        })
        .collect::<anyhow::Result<Vec<u64>>>()?;
    median(&mantissas).ok_or_else(|| anyhow!("no quotes"))
}

/// Fills in a price or an unavailability reason for every requested ticker.
/// `quotes` returns `None` when the ticker is missing from the response.
pub(crate) fn collect_prices<'a>(
    ticker_exponents: &HashMap<String, Exponent>,
    median: Medianizer,
    quotes: impl Fn(&str) -> Option<Vec<&'a str>>,
) -> ParsedPrices {
    let mut parsed = ParsedPrices::default();
    for (ticker, exponent) in ticker_exponents {
        let result = quotes(ticker)
            .ok_or_else(|| anyhow!("ticker {ticker} not found in response"))
            .and_then(|q| median_quote(&q, *exponent, median));
        match result {
            Ok(price) => {
                parsed.prices.insert(ticker.clone(), price);
            }
            Err(e) => {
                parsed.unavailable.insert(ticker.clone(), e);
            }
        }
    }
    parsed
}

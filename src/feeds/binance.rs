use std::collections::HashMap;

use serde::Deserialize;

use super::collect_prices;
use crate::handler::{ParsedPrices, PriceFunction};
use crate::math::Medianizer;
use crate::transport::HttpResponse;
use crate::types::Exponent;

/// Tickers are configured JSON-quoted, e.g. `"BTCUSDT"`, so the joined list is a JSON array.
pub const URL: &str = "https://data-api.binance.vision/api/v3/ticker/24hr?symbols=[$]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    last_price: String,
    bid_price: String,
    ask_price: String,
}

pub struct BinancePriceFunction;

impl PriceFunction for BinancePriceFunction {
    fn parse(
        &self,
        response: &HttpResponse,
        ticker_exponents: &HashMap<String, Exponent>,
        median: Medianizer,
    ) -> anyhow::Result<ParsedPrices> {
        let tickers: Vec<Ticker> = serde_json::from_str(&response.body)?;
        let by_symbol: HashMap<&str, &Ticker> =
            tickers.iter().map(|t| (t.symbol.as_str(), t)).collect();

        Ok(collect_prices(ticker_exponents, median, |ticker| {
            let t = by_symbol.get(ticker.trim_matches('"')).copied()?;
            Some(vec![
                t.last_price.as_str(),
                t.bid_price.as_str(),
                t.ask_price.as_str(),
            ])
        }))
    }
}

use std::collections::HashMap;

use anyhow::ensure;
use serde::Deserialize;

use super::collect_prices;
use crate::handler::{ParsedPrices, PriceFunction};
use crate::math::Medianizer;
use crate::transport::HttpResponse;
use crate::types::Exponent;

/// One product per request.
pub const URL: &str = "https://api.pro.coinbase.com/products/$/ticker";

#[derive(Debug, Deserialize)]
struct Ticker {
    price: String,
    bid: String,
    ask: String,
}

pub struct CoinbasePriceFunction;

impl PriceFunction for CoinbasePriceFunction {
    fn parse(
        &self,
        response: &HttpResponse,
        ticker_exponents: &HashMap<String, Exponent>,
        median: Medianizer,
    ) -> anyhow::Result<ParsedPrices> {
        ensure!(
            ticker_exponents.len() == 1,
            "coinbase responses cover exactly one ticker, got {}",
            ticker_exponents.len()
        );
        let t: Ticker = serde_json::from_str(&response.body)?;
        Ok(collect_prices(ticker_exponents, median, |_| {
            Some(vec![t.price.as_str(), t.bid.as_str(), t.ask.as_str()])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::median;

    #[test]
    fn test_parse() {
        let body = r#"{"trade_id":1,"price":"1850.10","size":"0.1","bid":"1849.90","ask":"1850.40","volume":"10"}"#;
        let exponents = HashMap::from([("ETH-USD".to_string(), -6)]);
        let parsed = CoinbasePriceFunction
            .parse(&HttpResponse::new(200, body), &exponents, median)
            .unwrap();
        assert_eq!(parsed.prices["ETH-USD"], 1_850_100_000);
        assert!(parsed.unavailable.is_empty());
    }

    #[test]
    fn test_unparseable_quote_is_unavailable() {
        let body = r#"{"price":"n/a","bid":"1","ask":"2"}"#;
        let exponents = HashMap::from([("ETH-USD".to_string(), -6)]);
        let parsed = CoinbasePriceFunction
            .parse(&HttpResponse::new(200, body), &exponents, median)
            .unwrap();
        assert!(parsed.prices.is_empty());
        assert!(parsed.unavailable.contains_key("ETH-USD"));
    }

    #[test]
    fn test_parse_requires_single_ticker() {
        let exponents = HashMap::from([("ETH-USD".to_string(), -6), ("BTC-USD".to_string(), -5)]);
        assert!(CoinbasePriceFunction
            .parse(&HttpResponse::new(200, "{}"), &exponents, median)
            .is_err());
    }
}

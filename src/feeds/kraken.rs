use std::collections::HashMap;

use anyhow::bail;
use serde::Deserialize;

use super::collect_prices;
use crate::handler::{ParsedPrices, PriceFunction};
use crate::math::Medianizer;
use crate::transport::HttpResponse;
use crate::types::Exponent;

pub const URL: &str = "https://api.kraken.com/0/public/Ticker?pair=$";

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, Ticker>,
}

/// `a` = ask, `b` = bid, `c` = last trade; the price is the first element of each.
#[derive(Debug, Deserialize)]
struct Ticker {
    a: Vec<String>,
    b: Vec<String>,
    c: Vec<String>,
}

impl Ticker {
    fn quotes(&self) -> Option<Vec<&str>> {
        Some(vec![
            self.a.first()?.as_str(),
            self.b.first()?.as_str(),
            self.c.first()?.as_str(),
        ])
    }
}

pub struct KrakenPriceFunction;

impl PriceFunction for KrakenPriceFunction {
    fn parse(
        &self,
        response: &HttpResponse,
        ticker_exponents: &HashMap<String, Exponent>,
        median: Medianizer,
    ) -> anyhow::Result<ParsedPrices> {
        let resp: TickerResponse = serde_json::from_str(&response.body)?;
        if !resp.error.is_empty() {
            bail!("kraken error: {}", resp.error.join(", "));
        }
        Ok(collect_prices(ticker_exponents, median, |ticker| {
            resp.result.get(ticker)?.quotes()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::median;

    #[test]
    fn test_parse() {
        let body = r#"{"error":[],"result":{
            "XXBTZUSD":{"a":["29204.50000","1","1.000"],"b":["29203.00000","2","2.000"],"c":["29203.10000","0.1"],"v":["1","2"]},
            "XETHZUSD":{"a":[],"b":["1850.0","1","1.0"],"c":["1850.1","0.1"]}
        }}"#;
        let exponents = HashMap::from([
            ("XXBTZUSD".to_string(), -5),
            ("XETHZUSD".to_string(), -6),
        ]);
        let parsed = KrakenPriceFunction
            .parse(&HttpResponse::new(200, body), &exponents, median)
            .unwrap();
        assert_eq!(parsed.prices["XXBTZUSD"], 2_920_310_000);
        // no asks on the book
        assert!(parsed.unavailable.contains_key("XETHZUSD"));
    }

    #[test]
    fn test_parse_error_field() {
        let body = r#"{"error":["EQuery:Unknown asset pair"]}"#;
        let exponents = HashMap::from([("XXBTZUSD".to_string(), -5)]);
        let err = KrakenPriceFunction
            .parse(&HttpResponse::new(200, body), &exponents, median)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown asset pair"));
    }
}

use std::collections::HashMap;

use anyhow::bail;
use serde::Deserialize;

use super::collect_prices;
use crate::handler::{ParsedPrices, PriceFunction};
use crate::math::Medianizer;
use crate::transport::HttpResponse;
use crate::types::Exponent;

/// Returns every spot ticker; there is nothing to substitute.
pub const URL: &str = "https://www.okx.com/api/v5/market/tickers?instType=SPOT";

#[derive(Debug, Deserialize)]
struct TickersResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    inst_id: String,
    last: String,
    ask_px: String,
    bid_px: String,
}

pub struct OkxPriceFunction;

impl PriceFunction for OkxPriceFunction {
    fn parse(
        &self,
        response: &HttpResponse,
        ticker_exponents: &HashMap<String, Exponent>,
        median: Medianizer,
    ) -> anyhow::Result<ParsedPrices> {
        let resp: TickersResponse = serde_json::from_str(&response.body)?;
        if resp.code != "0" {
            bail!("okx error code {}: {}", resp.code, resp.msg);
        }
        let by_inst: HashMap<&str, &Ticker> =
            resp.data.iter().map(|t| (t.inst_id.as_str(), t)).collect();

        Ok(collect_prices(ticker_exponents, median, |ticker| {
            let t = by_inst.get(ticker).copied()?;
            Some(vec![t.last.as_str(), t.ask_px.as_str(), t.bid_px.as_str()])
        }))
    }
}

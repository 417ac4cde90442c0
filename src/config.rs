use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::feeds::ExchangeStartupConfig;
use crate::types::{ExchangeId, ExchangeQueryConfig, MarketParam};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Exchanges to run. Empty means every exchange in the static table.
    #[serde(default)]
    pub exchanges: Vec<ExchangeId>,
    /// Partial query config per exchange; zero fields keep the default and
    /// `disabled = true` turns an exchange off.
    #[serde(default)]
    pub exchange_overrides: HashMap<ExchangeId, ExchangeQueryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub max_price_age_secs: u64,
    pub startup_grace_period_secs: u64,
    pub buffer_size: usize,
    pub report_interval_secs: u64,
    pub market_params_path: String,
    pub market_params_reload_secs: u64,
    pub max_idle_connections_per_exchange: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_price_age_secs: 30,
            startup_grace_period_secs: 120,
            buffer_size: 5_120,
            report_interval_secs: 10,
            market_params_path: "market_params.json".to_string(),
            market_params_reload_secs: 60,
            max_idle_connections_per_exchange: 2,
        }
    }
}

impl DaemonConfig {
    pub fn max_price_age(&self) -> Duration {
        Duration::from_secs(self.max_price_age_secs)
    }

    pub fn startup_grace_period(&self) -> Duration {
        Duration::from_secs(self.startup_grace_period_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn market_params_reload(&self) -> Duration {
        Duration::from_secs(self.market_params_reload_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {path}"))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(text).with_context(|| "parsing config TOML")?;
        for (id, delta) in cfg.exchange_overrides.iter_mut() {
            if delta.exchange_id.is_empty() {
                delta.exchange_id = id.clone();
            }
            if delta.exchange_id != *id {
                bail!("override for '{id}' names exchange '{}'", delta.exchange_id);
            }
            delta.validate_delta()?;
        }
        if cfg.daemon.buffer_size == 0 {
            bail!("daemon.buffer_size must be positive");
        }
        if cfg.daemon.report_interval_secs == 0 || cfg.daemon.market_params_reload_secs == 0 {
            bail!("daemon intervals must be positive");
        }
        Ok(cfg)
    }

    /// The static exchange table filtered to the configured exchanges, with
    /// overrides applied.
    pub fn exchanges(&self, table: Vec<ExchangeStartupConfig>) -> Result<Vec<ExchangeStartupConfig>> {
        for id in self.exchanges.iter().chain(self.exchange_overrides.keys()) {
            if !table.iter().any(|e| e.details.exchange == *id) {
                bail!("unknown exchange '{id}'");
            }
        }

        let mut selected = Vec::new();
        for mut exchange in table {
            if !self.exchanges.is_empty() && !self.exchanges.contains(&exchange.details.exchange) {
                continue;
            }
            if let Some(delta) = self.exchange_overrides.get(&exchange.details.exchange) {
                exchange.query_config = exchange.query_config.apply_delta(delta);
            }
            exchange
                .query_config
                .validate_full()
                .with_context(|| format!("query config for '{}'", exchange.details.exchange))?;
            selected.push(exchange);
        }
        if selected.is_empty() {
            bail!("no exchanges selected");
        }
        Ok(selected)
    }
}

/// Reads the market-param file: a JSON array of market param records.
pub fn load_market_params(path: &str) -> Result<Vec<MarketParam>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading market params from {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing market params in {path}"))
}

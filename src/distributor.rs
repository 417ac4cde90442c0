use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{error, info};

use crate::error::{ConfigError, UpdateMarketsError};
use crate::types::{
    ExchangeId, MarketConfig, MarketId, MarketParam, MutableExchangeMarketConfig,
    MutableMarketConfig,
};

/// Something that holds a private copy of one exchange's config and wants to
/// hear when it changes. Implemented by price fetchers and encoders.
pub trait ExchangeConfigUpdater: Send + Sync {
    fn exchange_id(&self) -> &str;

    fn update_config(
        &self,
        exchange_config: MutableExchangeMarketConfig,
        market_configs: Vec<MutableMarketConfig>,
    ) -> Result<(), ConfigError>;
}

#[derive(Default)]
struct Updaters {
    fetcher: Option<Arc<dyn ExchangeConfigUpdater>>,
    encoder: Option<Arc<dyn ExchangeConfigUpdater>>,
}

#[derive(Debug, Clone)]
struct DistributorState {
    exchange_configs: HashMap<ExchangeId, MutableExchangeMarketConfig>,
    market_configs: HashMap<MarketId, MutableMarketConfig>,
}

impl DistributorState {
    /// The exchange config plus metadata for every market it quotes or adjusts by,
    /// sorted by market id.
    fn update_parameters(&self, exchange_id: &str) -> Result<UpdateParameters, ConfigError> {
        let exchange_config = self
            .exchange_configs
            .get(exchange_id)
            .ok_or_else(|| ConfigError::UnknownExchange(exchange_id.to_string()))?
            .clone();

        let ids: BTreeSet<MarketId> = exchange_config
            .market_to_market_config
            .iter()
            .flat_map(|(id, config)| std::iter::once(*id).chain(config.adjust_by_market))
            .collect();
        let market_configs = ids
            .into_iter()
            .map(|id| {
                self.market_configs
                    .get(&id)
                    .cloned()
                    .ok_or(ConfigError::UnknownMarket(id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((exchange_config, market_configs))
    }
}

type UpdateParameters = (MutableExchangeMarketConfig, Vec<MutableMarketConfig>);

/// (fetcher, encoder)
type UpdaterPair = (Arc<dyn ExchangeConfigUpdater>, Arc<dyn ExchangeConfigUpdater>);

/// Single owner of the current exchange and market configs. Pushes changes to
/// each exchange's encoder and then its fetcher.
pub struct ConfigDistributor {
    exchange_ids: Vec<ExchangeId>,
    update_lock: Mutex<()>,
    state: RwLock<DistributorState>,
    updaters: Mutex<HashMap<ExchangeId, Updaters>>,
}

impl ConfigDistributor {
    /// Every exchange starts with an empty config.
    pub fn new(exchange_ids: &[ExchangeId]) -> Self {
        let mut exchange_ids = exchange_ids.to_vec();
        exchange_ids.sort();
        exchange_ids.dedup();

        let exchange_configs = exchange_ids
            .iter()
            .map(|id| (id.clone(), MutableExchangeMarketConfig::new(id.clone())))
            .collect();

        Self {
            exchange_ids,
            update_lock: Mutex::new(()),
            state: RwLock::new(DistributorState {
                exchange_configs,
                market_configs: HashMap::new(),
            }),
            updaters: Mutex::new(HashMap::new()),
        }
    }

    pub fn exchange_ids(&self) -> &[ExchangeId] {
        &self.exchange_ids
    }

    /// Panics if the exchange is unknown or already has a fetcher.
    pub fn add_price_fetcher(&self, fetcher: Arc<dyn ExchangeConfigUpdater>) {
        self.register(fetcher, "fetcher");
    }

    /// Panics if the exchange is unknown or already has an encoder.
    pub fn add_price_encoder(&self, encoder: Arc<dyn ExchangeConfigUpdater>) {
        self.register(encoder, "encoder");
    }

    fn register(&self, updater: Arc<dyn ExchangeConfigUpdater>, kind: &'static str) {
        let exchange_id = updater.exchange_id().to_string();
        if !self.exchange_ids.contains(&exchange_id) {
            panic!("cannot register price {kind} for unconfigured exchange '{exchange_id}'");
        }
        let mut updaters = self.updaters.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = updaters.entry(exchange_id.clone()).or_default();
        let slot = if kind == "fetcher" {
            &mut registered.fetcher
        } else {
            &mut registered.encoder
        };
        if slot.is_some() {
            panic!("price {kind} already registered for exchange '{exchange_id}'");
        }
        *slot = Some(updater);
    }

    pub fn exchange_market_config_copy(
        &self,
        exchange_id: &str,
    ) -> Result<MutableExchangeMarketConfig, ConfigError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .exchange_configs
            .get(exchange_id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownExchange(exchange_id.to_string()))
    }

    pub fn market_config_copies(
        &self,
        market_ids: &[MarketId],
    ) -> Result<Vec<MutableMarketConfig>, ConfigError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        market_ids
            .iter()
            .map(|id| {
                state
                    .market_configs
                    .get(id)
                    .cloned()
                    .ok_or(ConfigError::UnknownMarket(*id))
            })
            .collect()
    }

    /// Dry run of `update_markets`: reports per-market rejections without
    /// touching the current config or notifying anyone.
    pub fn validate_market_params(
        &self,
        market_params: &[MarketParam],
    ) -> Result<HashMap<MarketId, ConfigError>, ConfigError> {
        self.validate_and_transform(market_params)
            .map(|(_, market_errors)| market_errors)
    }

    /// Applies a full set of market params.
    ///
    /// Individually invalid markets are dropped and returned in the error map;
    /// the rest apply. Whole-update failures leave the current config untouched.
    /// A notification failure does not roll back the new config.
    pub fn update_markets(
        &self,
        market_params: Option<&[MarketParam]>,
    ) -> Result<HashMap<MarketId, ConfigError>, UpdateMarketsError> {
        let _serialized = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let market_params = market_params
            .ok_or(UpdateMarketsError::Invalid(ConfigError::MissingMarketParams))?;
        let updaters = self.updater_pairs().map_err(UpdateMarketsError::Invalid)?;
        let (next, market_errors) = self
            .validate_and_transform(market_params)
            .map_err(UpdateMarketsError::Invalid)?;

        let mut changed: Vec<(ExchangeId, UpdateParameters)> = Vec::new();
        {
            let current = self.state.read().unwrap_or_else(PoisonError::into_inner);
            for exchange_id in &self.exchange_ids {
                let params = next
                    .update_parameters(exchange_id)
                    .map_err(UpdateMarketsError::Invalid)?;
                let unchanged = current
                    .update_parameters(exchange_id)
                    .map(|old| old == params)
                    .unwrap_or(false);
                if !unchanged {
                    changed.push((exchange_id.clone(), params));
                }
            }
        }

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;

        let mut failures = Vec::new();
        for (exchange_id, (exchange_config, market_configs)) in changed {
            let Some((fetcher, encoder)) = updaters.get(&exchange_id) else {
                continue;
            };
            let before = failures.len();
            if let Err(e) = encoder.update_config(exchange_config.clone(), market_configs.clone()) {
                error!(exchange = %exchange_id, error = %e, "failed to update price encoder config");
                failures.push(format!("exchange '{exchange_id}' encoder: {e}"));
            }
            if let Err(e) = fetcher.update_config(exchange_config, market_configs) {
                error!(exchange = %exchange_id, error = %e, "failed to update price fetcher config");
                failures.push(format!("exchange '{exchange_id}' fetcher: {e}"));
            }
            if failures.len() == before {
                info!(exchange = %exchange_id, "exchange config updated");
            }
        }

        if failures.is_empty() {
            Ok(market_errors)
        } else {
            Err(UpdateMarketsError::Notify {
                failures,
                market_errors,
            })
        }
    }

    fn updater_pairs(&self) -> Result<HashMap<ExchangeId, UpdaterPair>, ConfigError> {
        let updaters = self.updaters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pairs = HashMap::with_capacity(self.exchange_ids.len());
        for exchange_id in &self.exchange_ids {
            let registered = updaters.get(exchange_id);
            let missing = |kind| ConfigError::MissingUpdater {
                exchange: exchange_id.clone(),
                kind,
            };
            let fetcher = registered
                .and_then(|u| u.fetcher.clone())
                .ok_or_else(|| missing("fetcher"))?;
            let encoder = registered
                .and_then(|u| u.encoder.clone())
                .ok_or_else(|| missing("encoder"))?;
            pairs.insert(exchange_id.clone(), (fetcher, encoder));
        }
        Ok(pairs)
    }

    /// Builds the next exchange and market configs from raw market params.
    fn validate_and_transform(
        &self,
        market_params: &[MarketParam],
    ) -> Result<(DistributorState, HashMap<MarketId, ConfigError>), ConfigError> {
        let mut seen = HashSet::with_capacity(market_params.len());
        for param in market_params {
            if !seen.insert(param.id) {
                return Err(ConfigError::DuplicateMarketId(param.id));
            }
        }

        let exchange_names: HashSet<ExchangeId> = self.exchange_ids.iter().cloned().collect();
        let market_names: HashMap<String, MarketId> = market_params
            .iter()
            .map(|param| (param.pair.clone(), param.id))
            .collect();

        let mut market_errors = HashMap::new();
        let mut accepted: HashMap<MarketId, (MutableMarketConfig, Vec<(ExchangeId, MarketConfig)>)> =
            HashMap::new();

        for param in market_params {
            let parsed = param.validate().and_then(|_| {
                let json = param.parse_exchange_config()?;
                json.validate(param.id, &exchange_names, &market_names)?;
                Ok(json)
            });
            let json = match parsed {
                Ok(json) => json,
                Err(e) => {
                    market_errors.insert(param.id, e);
                    continue;
                }
            };

            let exchanges = json
                .exchanges
                .iter()
                .map(|exchange| {
                    let mut config = MarketConfig::new(exchange.ticker.clone());
                    if let Some(adjust_by) = exchange
                        .adjust_by_market()
                        .and_then(|name| market_names.get(name))
                    {
                        config = config.adjusted_by(*adjust_by);
                    }
                    if exchange.invert {
                        config = config.inverted();
                    }
                    (exchange.exchange_name.clone(), config)
                })
                .collect();
            let market = MutableMarketConfig {
                id: param.id,
                pair: param.pair.clone(),
                exponent: param.exponent,
                min_exchanges: param.min_exchanges,
            };
            accepted.insert(param.id, (market, exchanges));
        }

        // Markets adjusted by a rejected market are rejected too, transitively.
        loop {
            let rejected: Vec<(MarketId, MarketId)> = accepted
                .iter()
                .filter_map(|(id, (_, exchanges))| {
                    exchanges
                        .iter()
                        .filter_map(|(_, config)| config.adjust_by_market)
                        .find(|adjust_by| !accepted.contains_key(adjust_by))
                        .map(|adjust_by| (*id, adjust_by))
                })
                .collect();
            if rejected.is_empty() {
                break;
            }
            for (market, adjust_by) in rejected {
                accepted.remove(&market);
                market_errors.insert(market, ConfigError::RejectedAdjustMarket { market, adjust_by });
            }
        }

        let mut exchange_configs: HashMap<ExchangeId, MutableExchangeMarketConfig> = self
            .exchange_ids
            .iter()
            .map(|id| (id.clone(), MutableExchangeMarketConfig::new(id.clone())))
            .collect();
        let mut market_configs = HashMap::with_capacity(accepted.len());
        for (id, (market, exchanges)) in accepted {
            for (exchange_id, config) in exchanges {
                if let Some(exchange_config) = exchange_configs.get_mut(&exchange_id) {
                    exchange_config.market_to_market_config.insert(id, config);
                }
            }
            market_configs.insert(id, market);
        }

        Ok((
            DistributorState {
                exchange_configs,
                market_configs,
            },
            market_errors,
        ))
    }
}

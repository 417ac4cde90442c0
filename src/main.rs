mod cache;
mod config;
mod daemon;
mod distributor;
mod encoder;
mod error;
mod feeds;
mod fetcher;
mod handler;
mod logging;
mod math;
mod transport;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use crate::config::Config;
use crate::distributor::ConfigDistributor;
use crate::handler::QueryHandler;
use crate::transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "pricefeed", about = "Exchange price ingestion daemon")]
struct Cli {
    /// Path to config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Validate the config and market params, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    logging::init();

    let exchanges = cfg.exchanges(feeds::exchange_table())?;

    if cli.once {
        let ids: Vec<_> = exchanges.iter().map(|e| e.details.exchange.clone()).collect();
        let params = config::load_market_params(&cfg.daemon.market_params_path)?;
        let rejected = ConfigDistributor::new(&ids)
            .validate_market_params(&params)
            .context("validating market params")?;
        for (market, err) in &rejected {
            error!(market, error = %err, "market param rejected");
        }
        info!(
            exchanges = ids.len(),
            markets = params.len(),
            rejected = rejected.len(),
            "config check complete"
        );
        return Ok(());
    }

    let transport = Arc::new(ReqwestTransport::new(
        cfg.daemon.max_idle_connections_per_exchange,
    )?);
    let daemon = daemon::start(&cfg.daemon, exchanges, transport, Arc::new(QueryHandler))?;

    daemon::spawn_market_param_updater(
        daemon.distributor.clone(),
        cfg.daemon.market_params_path.clone(),
        cfg.daemon.market_params_reload(),
        cfg.daemon.startup_grace_period(),
    );
    logging::spawn_price_reporter(
        daemon.prices.clone(),
        daemon.distributor.clone(),
        cfg.daemon.report_interval(),
    );

    info!(exchanges = daemon.distributor.exchange_ids().len(), "pricefeed daemon running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for task in daemon.tasks {
        task.abort();
    }
    Ok(())
}

mod api;
mod config;
mod desk;
mod domain;
mod interbank;
mod locks;
mod matching;
mod otc;
mod pricing;
mod settlement;
mod storage;
#[cfg(test)]
mod testing;

use std::env;
use std::sync::Arc;

use config::{Config, ConfigError};
use desk::{Desk, DeskConfig};
use interbank::{HttpInterbankClient, InterbankClient, InterbankClientConfig, InterbankError};
use locks::LockRegistry;
use matching::{MatchSettings, MatchingEngine};
use otc::{OtcService, OtcSettings};
use settlement::{BankingClient, BankingClientConfig, SettlementError};
use storage::{SqliteStorage, SqliteStorageConfig, StorageError};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Failure while wiring the service together.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("settlement client: {0}")]
    Settlement(#[from] SettlementError),
    #[error("interbank client: {0}")]
    Interbank(#[from] InterbankError),
    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_config_path() -> String {
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn init_tracing(log_level: Option<&str>) {
    let level = match log_level {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | Some("warning") => Level::WARN,
        Some("error") => Level::ERROR,
        Some("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[tokio::main]
async fn main() {
    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return;
        }
    };

    init_tracing(config.app.log_level.as_deref());
    info!(config = %config_path, app = %config.app.name, env = %config.app.env, "Configuration loaded");

    if let Err(e) = run(config).await {
        error!(error = %e, "Service failed");
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let storage = SqliteStorage::new(SqliteStorageConfig {
        path: config.storage.path.clone(),
        max_connections: config
            .storage
            .max_connections
            .unwrap_or(SqliteStorageConfig::default().max_connections),
    })
    .await?;

    let banking = Arc::new(BankingClient::new(BankingClientConfig::new(
        config.settlement.base_url.clone(),
        config.settlement.timeout,
    ))?);

    let interbank_cfg = config.interbank.as_ref().filter(|i| i.enabled);
    let interbank: Option<Arc<dyn InterbankClient>> = match interbank_cfg {
        Some(cfg) => {
            let client = HttpInterbankClient::new(InterbankClientConfig::new(
                cfg.partner_url.clone().unwrap_or_default(),
                cfg.api_key.clone(),
                cfg.routing_number(),
                cfg.timeout,
            ))?;
            info!(partner = cfg.partner_routing_number(), "Interbank negotiation enabled");
            Some(Arc::new(client))
        }
        None => {
            info!("Interbank negotiation disabled");
            None
        }
    };

    let locks = Arc::new(LockRegistry::new());
    let engine = Arc::new(MatchingEngine::new(
        storage.clone(),
        banking.clone(),
        locks.clone(),
        MatchSettings::from_config(config.matching.as_ref()),
    ));

    let own_routing = interbank_cfg
        .map(|i| i.routing_number())
        .unwrap_or(config::DEFAULT_ROUTING_NUMBER);
    let partner_routing = interbank_cfg
        .map(|i| i.partner_routing_number())
        .unwrap_or(config::DEFAULT_PARTNER_ROUTING_NUMBER);
    let otc = Arc::new(OtcService::new(
        storage.clone(),
        banking.clone(),
        banking,
        interbank,
        locks.clone(),
        OtcSettings {
            own_routing,
            partner_routing,
            currency: config.settlement_currency(),
        },
    ));

    let desk = Arc::new(Desk::new(
        engine.clone(),
        otc.clone(),
        locks,
        DeskConfig::from_config(config.sweeps.as_ref()),
    ));
    let desk_task = {
        let desk = Arc::clone(&desk);
        tokio::spawn(async move {
            if let Err(e) = desk.start().await {
                warn!(error = %e, "Desk did not start");
            }
        })
    };

    let inbound_secret = interbank_cfg.map(|i| i.inbound_secret.as_str());
    let app = api::router(api::AppState::new(otc, engine, inbound_secret));

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "HTTP server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    desk.stop().await;
    if let Err(e) = desk_task.await {
        warn!(error = %e, "Desk task ended abnormally");
    }
    storage.close().await;
    info!("Shutdown complete");

    served.map_err(StartupError::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

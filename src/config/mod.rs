//! Configuration loading and validation for the trading core.
//!
//! Uses serde_yaml to load YAML configuration files with support for
//! environment variable overrides for interbank secrets.

mod app;
mod duration;
mod error;
mod interbank;
mod matching;
mod server;
mod settlement;
mod storage;
mod sweeps;

pub use app::AppConfig;
pub use error::ConfigError;
pub use interbank::{DEFAULT_PARTNER_ROUTING_NUMBER, DEFAULT_ROUTING_NUMBER, InterbankConfig};
pub use matching::MatchingConfig;
pub use server::ServerConfig;
pub use settlement::SettlementConfig;
pub use storage::StorageConfig;
pub use sweeps::SweepConfig;

use serde::Deserialize;
use std::{env, fs};

/// Root configuration structure.
///
/// Required sections: app, storage, settlement.
/// Optional sections: server, matching, interbank, sweeps.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub settlement: SettlementConfig,
    /// Matching loop pacing and margin parameters (optional).
    pub matching: Option<MatchingConfig>,
    /// Remote bank negotiation (optional, disabled when absent).
    pub interbank: Option<InterbankConfig>,
    /// Background job periods (optional).
    pub sweeps: Option<SweepConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Loads `.env` first (if present), then the YAML file, then the
    /// interbank secrets `INTERBANK_API_KEY` and `INTERBANK_INBOUND_SECRET`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_string(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        config.load_credentials_from_env();
        config.validate()?;

        Ok(config)
    }

    fn load_credentials_from_env(&mut self) {
        if let Some(ref mut interbank) = self.interbank {
            if interbank.enabled {
                interbank.api_key = env::var("INTERBANK_API_KEY").unwrap_or_default();
                interbank.inbound_secret = env::var("INTERBANK_INBOUND_SECRET").unwrap_or_default();
            }
        }
    }

    /// Returns the settlement currency, USD when not configured.
    pub fn settlement_currency(&self) -> String {
        self.settlement
            .currency
            .clone()
            .unwrap_or_else(|| "USD".to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        if self.storage.path.is_empty() {
            return Err(ConfigError::Validation("storage.path is required".into()));
        }

        if self.settlement.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "settlement.base_url is required".into(),
            ));
        }

        if let Some(ref matching) = self.matching {
            if !matching.backoff_max.is_zero() && matching.backoff_max < matching.backoff_min {
                return Err(ConfigError::Validation(
                    "matching.backoff_max must not be below matching.backoff_min".into(),
                ));
            }
            if matching.margin_rate.is_some_and(|r| r.is_sign_negative()) {
                return Err(ConfigError::Validation(
                    "matching.margin_rate must not be negative".into(),
                ));
            }
        }

        if let Some(ref interbank) = self.interbank {
            if interbank.enabled {
                if interbank.partner_url.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Validation(
                        "interbank.partner_url is required when interbank is enabled".into(),
                    ));
                }

                if interbank.routing_number() == interbank.partner_routing_number() {
                    return Err(ConfigError::Validation(
                        "interbank.routing_number must differ from the partner routing number"
                            .into(),
                    ));
                }

                // Only require secrets in production/staging
                if self.app.is_production()
                    && (interbank.api_key.is_empty() || interbank.inbound_secret.is_empty())
                {
                    return Err(ConfigError::Validation(
                        "interbank credentials not found (set INTERBANK_API_KEY and INTERBANK_INBOUND_SECRET env vars)".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;

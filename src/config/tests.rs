//! Tests for config module.

use super::*;
use rust_decimal::Decimal;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

// ==================== Duration parsing tests ====================

#[test]
fn test_parse_duration_seconds() {
    let d = duration::parse_duration("30s").unwrap();
    assert_eq!(d, Duration::from_secs(30));
}

#[test]
fn test_parse_duration_minutes() {
    let d = duration::parse_duration("30m").unwrap();
    assert_eq!(d, Duration::from_secs(1800));
}

#[test]
fn test_parse_duration_days() {
    let d = duration::parse_duration("1d").unwrap();
    assert_eq!(d, Duration::from_secs(86400));
}

#[test]
fn test_parse_duration_milliseconds() {
    let d = duration::parse_duration("250ms").unwrap();
    assert_eq!(d, Duration::from_millis(250));
}

#[test]
fn test_parse_duration_empty() {
    let d = duration::parse_duration("").unwrap();
    assert_eq!(d, Duration::ZERO);
}

#[test]
fn test_parse_duration_invalid_unit() {
    let result = duration::parse_duration("10w");
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("unknown duration unit"));
}

#[test]
fn test_parse_duration_rejects_fractions() {
    assert!(duration::parse_duration("1.5s").is_err());
    assert!(duration::parse_duration("-5s").is_err());
}

#[test]
fn test_sweep_interval_accepts_bare_seconds() {
    let sweeps: SweepConfig = serde_yaml::from_str("resubmit_interval: 7\nexpiry_interval: 2h\n").unwrap();
    assert_eq!(sweeps.resubmit_interval, Duration::from_secs(7));
    assert_eq!(sweeps.expiry_interval, Duration::from_secs(7200));
    assert_eq!(sweeps.decline_interval, Duration::ZERO);
}

// ==================== YAML field loading tests ====================

fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

fn minimal_valid_yaml() -> String {
    r#"
app:
  name: trading-core
  env: development

storage:
  path: "trading.db"

settlement:
  base_url: "http://banking.local"
"#
    .to_string()
}

#[test]
fn test_load_minimal_defaults() {
    let cfg = from_yaml(&minimal_valid_yaml()).unwrap();

    assert_eq!(cfg.app.name, "trading-core");
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:8080");
    assert_eq!(cfg.settlement_currency(), "USD");
    assert!(cfg.matching.is_none());
    assert!(cfg.interbank.is_none());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_load_matching_fields() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
matching:
  backoff_min: 1s
  backoff_max: 10s
  after_hours_delay: 30m
  margin_rate: "0.3"
  margin_buffer: "1.1"
  house_account_id: 112
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    let matching = cfg.matching.unwrap();
    assert_eq!(matching.backoff_min, Duration::from_secs(1));
    assert_eq!(matching.backoff_max, Duration::from_secs(10));
    assert_eq!(matching.after_hours_delay, Duration::from_secs(1800));
    assert_eq!(matching.margin_rate, Some(Decimal::new(3, 1)));
    assert_eq!(matching.margin_buffer, Some(Decimal::new(11, 1)));
    assert_eq!(matching.house_account_id, Some(112));
}

#[test]
fn test_load_interbank_defaults() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
interbank:
  enabled: true
  partner_url: "http://partner.local/api"
  timeout: 5s
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    let interbank = cfg.interbank.clone().unwrap();
    assert!(interbank.enabled);
    assert_eq!(interbank.routing_number(), 111);
    assert_eq!(interbank.partner_routing_number(), 444);
    assert_eq!(interbank.timeout, Duration::from_secs(5));
    assert!(interbank.api_key.is_empty());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_load_sweep_fields() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
sweeps:
  resubmit_interval: 5s
  expiry_interval: 1h
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    let sweeps = cfg.sweeps.unwrap();
    assert_eq!(sweeps.resubmit_interval, Duration::from_secs(5));
    assert_eq!(sweeps.expiry_interval, Duration::from_secs(3600));
    assert_eq!(sweeps.decline_interval, Duration::ZERO);
}

// ==================== Validation tests ====================

#[test]
fn test_validate_rejects_empty_app_name() {
    let yaml = minimal_valid_yaml().replace("name: trading-core", "name: \"\"");
    let cfg = from_yaml(&yaml).unwrap();

    let result = cfg.validate();
    assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("app.name")));
}

#[test]
fn test_validate_rejects_inverted_backoff() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
matching:
  backoff_min: 10s
  backoff_max: 1s
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_validate_interbank_requires_partner_url() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
interbank:
  enabled: true
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    let result = cfg.validate();
    assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("partner_url")));
}

#[test]
fn test_validate_interbank_rejects_same_routing() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml(),
        r#"
interbank:
  enabled: true
  partner_url: "http://partner.local"
  routing_number: 444
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_validate_production_requires_interbank_secrets() {
    let yaml = format!(
        "{}{}",
        minimal_valid_yaml().replace("env: development", "env: production"),
        r#"
interbank:
  enabled: true
  partner_url: "http://partner.local"
"#
    );
    let cfg = from_yaml(&yaml).unwrap();

    let result = cfg.validate();
    assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("INTERBANK_API_KEY")));
}

// ==================== File loading tests ====================

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(minimal_valid_yaml().as_bytes()).unwrap();

    let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(cfg.storage.path, "trading.db");
}

#[test]
fn test_load_missing_file() {
    let result = Config::load("/nonexistent/config.yaml");
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
}

#[test]
fn test_load_invalid_yaml() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"app: [unclosed").unwrap();

    let result = Config::load(file.path().to_str().unwrap());
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

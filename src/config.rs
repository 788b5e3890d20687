//! Configuration module for loading and parsing TOML configuration files.

use crate::derivatives::DerivativesConfig;
use crate::identity::IdentityConfig;
use crate::instrument::Category;
use crate::pricing::{MAX_PRICE, PricingConfig};
use crate::providers::RetryPolicy;
use crate::year::{YearRule, default_year_rules};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// PostgreSQL pool settings; the URL comes from `DATABASE_URL`.
    pub database: DatabaseConfig,
    /// Batch run configuration.
    pub run: RunConfig,
    /// Upstream providers.
    pub providers: Vec<ProviderConfig>,
    /// Era buckets and capitalization multipliers.
    pub pricing: PricingConfig,
    /// Derivative generation parameters.
    pub derivatives: DerivativesConfig,
    /// Year extraction rules, evaluated in order.
    pub year_rules: Vec<YearRule>,
    /// Cross-provider identity rules.
    pub identity: IdentityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum open connections.
    pub max_connections: u32,
    /// Seconds to wait for a free connection.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Batch run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Records requested per provider page.
    pub page_size: usize,
    /// Providers fetched at the same time.
    pub max_concurrent_providers: usize,
    /// Era bucket used when an entity's year is unknown.
    pub default_era: String,
    /// Records to fetch per provider; empty fetches every provider in full.
    pub provider_quotas: BTreeMap<String, usize>,
    /// Retry policy for provider pages.
    pub retry: RetryPolicy,
    /// Pinned synthesis date (`"YYYY-MM-DD"`); today when absent.
    pub as_of: Option<NaiveDate>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_concurrent_providers: 2,
            default_era: "modern".to_string(),
            provider_quotas: BTreeMap::new(),
            retry: RetryPolicy::default(),
            as_of: None,
        }
    }
}

/// One upstream provider backed by a JSON fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; also its id namespace.
    pub name: String,
    /// JSON file holding an array of raw entity records.
    pub path: PathBuf,
    /// Minimum spacing between requests, milliseconds.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Authority rank, lower wins.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            run: RunConfig::default(),
            providers: Vec::new(),
            pricing: PricingConfig::default(),
            derivatives: DerivativesConfig::default(),
            year_rules: default_year_rules(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Arguments
    /// * `content` - TOML content as string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_run()?;
        self.validate_providers()?;
        self.validate_pricing()?;
        self.validate_derivatives()
    }

    fn validate_run(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be positive"));
        }
        if self.run.page_size == 0 {
            return Err(invalid("run.page_size must be positive"));
        }
        if self.run.max_concurrent_providers == 0 {
            return Err(invalid("run.max_concurrent_providers must be positive"));
        }
        if self.run.retry.max_attempts == 0 {
            return Err(invalid("run.retry.max_attempts must be positive"));
        }
        if !self.pricing.eras.iter().any(|e| e.name == self.run.default_era) {
            return Err(invalid(format!(
                "run.default_era '{}' does not name an era bucket",
                self.run.default_era
            )));
        }
        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() || provider.name.contains(':') {
                return Err(invalid(format!(
                    "provider name '{}' must be non-empty and contain no ':'",
                    provider.name
                )));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!("provider '{}' configured twice", provider.name)));
            }
        }
        Ok(())
    }

    fn validate_pricing(&self) -> Result<(), ConfigError> {
        let eras = &self.pricing.eras;
        if eras.is_empty() {
            return Err(invalid("pricing.eras must not be empty"));
        }

        let mut names = HashSet::new();
        for (i, era) in eras.iter().enumerate() {
            if !names.insert(era.name.as_str()) {
                return Err(invalid(format!("era '{}' defined twice", era.name)));
            }
            if era.base_price <= 0.0 || era.capitalization <= 0.0 {
                return Err(invalid(format!(
                    "era '{}' needs a positive base_price and capitalization",
                    era.name
                )));
            }
            if let (Some(start), Some(end)) = (era.start_year, era.end_year)
                && start > end
            {
                return Err(invalid(format!("era '{}' starts after it ends", era.name)));
            }
            if i > 0 && era.start_year.is_none() {
                return Err(invalid(format!("era '{}' must have a start_year", era.name)));
            }
            if i + 1 < eras.len() && era.end_year.is_none() {
                return Err(invalid(format!("era '{}' must have an end_year", era.name)));
            }
            if let Some(prev) = i.checked_sub(1).and_then(|p| eras.get(p))
                && prev.end_year.map(|e| e.saturating_add(1)) != era.start_year
            {
                return Err(invalid(format!(
                    "era '{}' must start the year after '{}' ends",
                    era.name, prev.name
                )));
            }
            if !era.contains(era.representative_year) {
                return Err(invalid(format!(
                    "era '{}' representative_year lies outside the bucket",
                    era.name
                )));
            }
        }

        for code in self.pricing.category_multipliers.keys() {
            if Category::from_code(code).is_none() {
                return Err(invalid(format!("unknown category code '{code}' in multipliers")));
            }
        }
        let min_multiplier = Category::ALL
            .iter()
            .map(|c| {
                self.pricing
                    .category_multipliers
                    .get(c.code())
                    .copied()
                    .unwrap_or(1.0)
            })
            .fold(f64::INFINITY, f64::min);
        if min_multiplier <= 0.0 {
            return Err(invalid("category multipliers must be positive"));
        }

        let max_price = MAX_PRICE.to_f64().unwrap_or(f64::MAX);
        if let Some(era) = eras
            .iter()
            .find(|e| e.capitalization * min_multiplier < max_price)
        {
            return Err(invalid(format!(
                "era '{}' capitalization is too small to hold one share at the price ceiling",
                era.name
            )));
        }
        Ok(())
    }

    fn validate_derivatives(&self) -> Result<(), ConfigError> {
        let d = &self.derivatives;
        if !(5..=9).contains(&d.option_offsets.len()) {
            return Err(invalid("derivatives.option_offsets needs 5-9 entries"));
        }
        if !(5..=9).contains(&d.leap_offsets.len()) {
            return Err(invalid("derivatives.leap_offsets needs 5-9 entries"));
        }
        if d
            .option_offsets
            .iter()
            .chain(&d.leap_offsets)
            .any(|o| *o <= -1.0 || !o.is_finite())
        {
            return Err(invalid("strike offsets must be finite and above -1.0"));
        }
        if !(2..=4).contains(&d.expiry_count) {
            return Err(invalid("derivatives.expiry_count must be 2-4"));
        }
        if d.expiry_interval_months == 0 {
            return Err(invalid("derivatives.expiry_interval_months must be positive"));
        }
        if d.leap_years_out.is_empty() || d.leap_years_out.contains(&0) {
            return Err(invalid("derivatives.leap_years_out needs at least one positive entry"));
        }
        if !(1..=3).contains(&d.bond_coupons.len()) {
            return Err(invalid("derivatives.bond_coupons needs 1-3 tiers"));
        }
        if d.bond_coupons.iter().any(|c| !(*c > 0.0 && *c < 20.0)) {
            return Err(invalid("bond coupons must lie strictly between 0 and 20"));
        }
        if d.etf_min_members == 0 {
            return Err(invalid("derivatives.etf_min_members must be positive"));
        }
        if let Some(code) = d
            .etf_groups
            .values()
            .find(|c| !crate::ticker::is_valid_series_code(c))
        {
            return Err(invalid(format!("ETF group code '{code}' is not a valid code")));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 3000

[run]
page_size = 50
default_era = "golden"
as_of = "2024-12-01"

[run.provider_quotas]
comicvine = 200
metron = 50

[run.retry]
max_attempts = 4
delay_ms = 500

[[providers]]
name = "comicvine"
path = "fixtures/comicvine.json"
min_interval_ms = 18000
priority = 1

[[providers]]
name = "metron"
path = "fixtures/metron.json"

[derivatives]
bond_coupons = [4.0, 6.0]
expiry_count = 2
"#;

        let config = Config::parse(toml_content).expect("should parse");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.run.page_size, 50);
        assert_eq!(config.run.default_era, "golden");
        assert_eq!(config.run.as_of, NaiveDate::from_ymd_opt(2024, 12, 1));
        assert_eq!(config.run.provider_quotas.get("comicvine"), Some(&200));
        assert_eq!(config.run.retry, RetryPolicy::new(4, 500));
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].min_interval_ms, 18000);
        assert_eq!(config.providers[1].priority, 100);
        assert_eq!(config.derivatives.bond_coupons, vec![4.0, 6.0]);
        assert_eq!(config.derivatives.option_offsets.len(), 9);
        assert_eq!(config.pricing.eras.len(), 4);
        assert!(!config.year_rules.is_empty());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").expect("defaults are valid");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.run.default_era, "modern");
        assert!(config.providers.is_empty());
        assert!(config.identity.merge_by_name);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9090").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/catalog.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = Config::parse("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_strike_offsets() {
        let err = Config::parse("[derivatives]\noption_offsets = [-0.1, 0.0, 0.1]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_validation_coupons() {
        assert!(Config::parse("[derivatives]\nbond_coupons = [5.0, 25.0]").is_err());
        assert!(Config::parse("[derivatives]\nbond_coupons = []").is_err());
        assert!(Config::parse("[derivatives]\nbond_coupons = [1.0, 2.0, 3.0, 4.0]").is_err());
    }

    #[test]
    fn test_validation_expiry_count() {
        assert!(Config::parse("[derivatives]\nexpiry_count = 1").is_err());
        assert!(Config::parse("[derivatives]\nexpiry_count = 5").is_err());
    }

    #[test]
    fn test_validation_unknown_default_era() {
        let err = Config::parse("[run]\ndefault_era = \"stone\"").unwrap_err();
        assert!(err.to_string().contains("stone"));
    }

    #[test]
    fn test_validation_era_gap() {
        let toml_content = r#"
[pricing]
[[pricing.eras]]
name = "old"
end_year = 1959
base_price = 1000.0
capitalization = 50000000.0
representative_year = 1950

[[pricing.eras]]
name = "modern"
start_year = 1970
base_price = 100.0
capitalization = 50000000.0
representative_year = 2000
"#;
        let err = Config::parse(toml_content).unwrap_err();
        assert!(err.to_string().contains("modern"));
    }

    #[test]
    fn test_validation_capitalization_floor() {
        let toml_content = r#"
[pricing]
[[pricing.eras]]
name = "modern"
base_price = 100.0
capitalization = 1000.0
representative_year = 2000
"#;
        assert!(Config::parse(toml_content).is_err());
    }

    #[test]
    fn test_validation_zero_page_size() {
        let mut config = Config::default();
        config.run.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_provider() {
        let mut config = Config::default();
        let provider = ProviderConfig {
            name: "gcd".to_string(),
            path: PathBuf::from("gcd.json"),
            min_interval_ms: 0,
            priority: 1,
        };
        config.providers = vec![provider.clone(), provider];
        assert!(config.validate().is_err());
    }
}

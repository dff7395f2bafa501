//! Auction and server configuration: defaults, JSON file and command-line overrides.

use crate::defs::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SEC, DEFAULT_PORT, MIN_AUCTION_DURATION,
    PEER_SEND_TIMEOUT_MSEC,
};
use crate::errors::ConfigError;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// What is being sold and for how long.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    /// Name of the item on sale.
    pub item_name: String,
    /// Free-text item description.
    pub description: String,
    /// Floor price; the first accepted bid must exceed it.
    pub starting_price: f64,
    /// Round length in ticks (seconds).
    pub auction_duration: u64,

    /// Where the effective values came from; not read from the file.
    #[serde(skip)]
    pub config_source: String,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            item_name: "Mystery item".to_string(),
            description: "A special item is waiting for its new owner!".to_string(),
            starting_price: 1000.0,
            auction_duration: 120,
            config_source: "default".to_string(),
        }
    }
}

/// Command-line overrides; `None` keeps the file/default value.
#[derive(Clone, Debug, Default)]
pub struct AuctionOverrides {
    /// Replaces [`AuctionConfig::item_name`].
    pub item_name: Option<String>,
    /// Replaces [`AuctionConfig::description`].
    pub description: Option<String>,
    /// Replaces [`AuctionConfig::starting_price`].
    pub starting_price: Option<f64>,
    /// Replaces [`AuctionConfig::auction_duration`].
    pub auction_duration: Option<u64>,
}

impl AuctionConfig {
    /// Loads a JSON config file. Missing keys fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("Loading auction configuration from: {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.config_source = format!("file:{}", path.display());
        Ok(config)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the defaults.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::metadata(path.as_ref()) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!(
                    "Config file {:?} not found, using defaults",
                    path.as_ref()
                );
                Ok(Self::default())
            }
            _ => Self::from_file(path),
        }
    }

    /// Applies command-line values on top of the loaded ones.
    pub fn apply_overrides(&mut self, overrides: AuctionOverrides) {
        let mut touched = false;

        if let Some(item) = overrides.item_name {
            self.item_name = item;
            touched = true;
        }
        if let Some(desc) = overrides.description {
            self.description = desc;
            touched = true;
        }
        if let Some(price) = overrides.starting_price {
            self.starting_price = price;
            touched = true;
        }
        if let Some(duration) = overrides.auction_duration {
            self.auction_duration = duration;
            touched = true;
        }

        if touched {
            self.config_source = "command_line".to_string();
        }
    }

    /// Checks the business rules the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.item_name.trim().is_empty() {
            return Err(ConfigError::Invalid("item name must not be empty".into()));
        }
        if !self.starting_price.is_finite() || self.starting_price <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "starting price must be greater than 0 (got {})",
                self.starting_price
            )));
        }
        if self.auction_duration < MIN_AUCTION_DURATION {
            return Err(ConfigError::Invalid(format!(
                "auction duration must be at least {} seconds (got {})",
                MIN_AUCTION_DURATION, self.auction_duration
            )));
        }
        Ok(())
    }

    /// Logs the effective configuration.
    pub fn log_banner(&self) {
        log::info!("Item           : {}", self.item_name);
        log::info!("Starting price : ${}", self.starting_price);
        log::info!(
            "Duration       : {}s ({}:{:02})",
            self.auction_duration,
            self.auction_duration / 60,
            self.auction_duration % 60
        );
        log::info!("Description    : {}", self.description);
        log::info!("Config source  : {}", self.config_source);
    }
}

/// Network-side settings of the server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Drop connections silent for longer than this; `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on a single write to one peer.
    pub send_timeout: Duration,
    /// Start the round as soon as the server is up.
    pub auto_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: idle_timeout_from_secs(DEFAULT_IDLE_TIMEOUT_SEC),
            send_timeout: Duration::from_millis(PEER_SEND_TIMEOUT_MSEC),
            auto_start: false,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Maps a seconds value to an idle timeout, `0` meaning none.
pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_file_valid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"item_name":"PS5 Console","starting_price":5000,"auction_duration":180,"description":"Boxed"}}"#
        )
        .unwrap();

        let config = AuctionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.item_name, "PS5 Console");
        assert_eq!(config.starting_price, 5000.0);
        assert_eq!(config.auction_duration, 180);
        assert_eq!(config.description, "Boxed");
        assert!(config.config_source.starts_with("file:"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"item_name":"Lamp"}}"#).unwrap();

        let config = AuctionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.item_name, "Lamp");
        assert_eq!(config.starting_price, 1000.0);
        assert_eq!(config.auction_duration, 120);
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();

        match AuctionConfig::from_file(file.path()) {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AuctionConfig::from_file_or_default("definitely_missing_config.json").unwrap();
        assert_eq!(config, AuctionConfig::default());

        assert!(matches!(
            AuctionConfig::from_file("definitely_missing_config.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_overrides_take_priority() {
        let mut config = AuctionConfig::default();
        config.apply_overrides(AuctionOverrides {
            item_name: Some("MacBook Pro".into()),
            starting_price: Some(20000.0),
            auction_duration: Some(180),
            ..Default::default()
        });

        assert_eq!(config.item_name, "MacBook Pro");
        assert_eq!(config.starting_price, 20000.0);
        assert_eq!(config.auction_duration, 180);
        assert_eq!(config.config_source, "command_line");
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = AuctionConfig::default();
        config.apply_overrides(AuctionOverrides::default());
        assert_eq!(config.config_source, "default");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let blank = AuctionConfig {
            item_name: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(ConfigError::Invalid(_))));

        let free = AuctionConfig {
            starting_price: 0.0,
            ..Default::default()
        };
        assert!(matches!(free.validate(), Err(ConfigError::Invalid(_))));

        let short = AuctionConfig {
            auction_duration: 9,
            ..Default::default()
        };
        assert!(matches!(short.validate(), Err(ConfigError::Invalid(_))));

        let minimal = AuctionConfig {
            auction_duration: 10,
            ..Default::default()
        };
        assert!(minimal.validate().is_ok());
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:9999");
        assert_eq!(config.idle_timeout, None);
        assert_eq!(idle_timeout_from_secs(30), Some(Duration::from_secs(30)));
    }
}

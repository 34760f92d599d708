//! Client configuration from environment variables or a TOML file
//!
//! Controls the backend endpoint, flow validation limits and timer intervals.
//! Every field has a default, so a partial file or an empty environment is fine.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;
use crate::Result;

const ENV_PREFIX: &str = "SATELLION_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the wallet backend command endpoint
    pub backend_url: String,
    /// Per-command HTTP timeout
    pub request_timeout_secs: u64,
    /// Capacity of the backend event broadcast channel
    pub event_channel_capacity: usize,
    /// Minimum passphrase length accepted by `create_wallet`
    pub min_passphrase_len: usize,
    /// Number of mnemonic positions the user must re-enter
    pub verification_word_count: usize,
    pub min_mnemonic_words: usize,
    pub max_mnemonic_words: usize,
    /// Imported phrases must have a word count divisible by this
    pub mnemonic_word_granularity: usize,
    pub min_word_len: usize,
    /// Quiet period before a recipient address is sent for validation
    pub address_debounce_ms: u64,
    /// Ethereum chain info polling interval
    pub chain_poll_interval_ms: u64,
    pub ok_notification_ms: u64,
    pub err_notification_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:7654".to_string(),
            request_timeout_secs: 30,
            event_channel_capacity: 256,
            min_passphrase_len: 8,
            verification_word_count: 3,
            min_mnemonic_words: 12,
            max_mnemonic_words: 24,
            mnemonic_word_granularity: 3,
            min_word_len: 2,
            address_debounce_ms: 300,
            chain_poll_interval_ms: 1000,
            ok_notification_ms: 3000,
            err_notification_ms: 10000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `.env` first if present. Recognised variables:
    /// - `SATELLION_BACKEND_URL`
    /// - `SATELLION_REQUEST_TIMEOUT_SECS`
    /// - `SATELLION_MIN_PASSPHRASE_LEN`
    /// - `SATELLION_VERIFICATION_WORD_COUNT`
    /// - `SATELLION_ADDRESS_DEBOUNCE_MS`
    /// - `SATELLION_CHAIN_POLL_INTERVAL_MS`
    ///
    /// Unparseable numbers are rejected rather than silently defaulted.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = env::var(format!("{ENV_PREFIX}BACKEND_URL")) {
            config.backend_url = url;
        }
        log::info!("Backend URL: {}", config.backend_url);

        if let Some(v) = env_number("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = env_number("MIN_PASSPHRASE_LEN")? {
            config.min_passphrase_len = v;
        }
        if let Some(v) = env_number("VERIFICATION_WORD_COUNT")? {
            config.verification_word_count = v;
        }
        if let Some(v) = env_number("ADDRESS_DEBOUNCE_MS")? {
            config.address_debounce_ms = v;
        }
        if let Some(v) = env_number("CHAIN_POLL_INTERVAL_MS")? {
            config.chain_poll_interval_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            ClientError::Config(format!("Invalid TOML in {}: {}", path.display(), e))
        })?;

        log::info!("Loaded client config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.mnemonic_word_granularity == 0 {
            return Err(ClientError::Config(
                "mnemonic_word_granularity must be positive".into(),
            ));
        }
        if self.min_mnemonic_words > self.max_mnemonic_words {
            return Err(ClientError::Config(format!(
                "min_mnemonic_words ({}) exceeds max_mnemonic_words ({})",
                self.min_mnemonic_words, self.max_mnemonic_words
            )));
        }
        if self.verification_word_count == 0
            || self.verification_word_count > self.min_mnemonic_words
        {
            return Err(ClientError::Config(format!(
                "verification_word_count must be between 1 and {}",
                self.min_mnemonic_words
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::Config("event_channel_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn address_debounce(&self) -> Duration {
        Duration::from_millis(self.address_debounce_ms)
    }

    pub fn chain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chain_poll_interval_ms)
    }

    pub fn ok_notification_timeout(&self) -> Duration {
        Duration::from_millis(self.ok_notification_ms)
    }

    pub fn err_notification_timeout(&self) -> Duration {
        Duration::from_millis(self.err_notification_ms)
    }
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{key} is not a valid number: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.min_passphrase_len, 8);
        assert_eq!(config.verification_word_count, 3);
        assert_eq!(config.min_mnemonic_words, 12);
        assert_eq!(config.max_mnemonic_words, 24);
        assert_eq!(config.chain_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.ok_notification_timeout(), Duration::from_secs(3));
        assert_eq!(config.err_notification_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend_url = \"http://localhost:9000\"").unwrap();
        writeln!(file, "min_passphrase_len = 12").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend_url, "http://localhost:9000");
        assert_eq!(config.min_passphrase_len, 12);
        assert_eq!(config.verification_word_count, 3);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_passphrase_len = \"eight\"").unwrap();

        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/satellion.toml").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_inverted_word_bounds() {
        let config = ClientConfig {
            min_mnemonic_words: 24,
            max_mnemonic_words: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            verification_word_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Configuration loaded once at process start.

use crate::{node::Pool, Error};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

/// Default number of attempts to re-enable forging on the active node.
const DEFAULT_MAX_RETRIES: usize = 3;

/// Default per-call timeout.
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default pause between attempts to re-enable forging.
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state/state.json")
}

/// Configuration of the rotator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Public key of the delegate.
    pub public_key: String,

    /// Password sent with every forging toggle.
    pub password: String,

    /// API endpoints used for delegate queries (missed blocks, forging queue).
    ///
    /// Tried in order; the first endpoint that responds is used for the run.
    pub apis: Vec<String>,

    /// Candidate forging nodes.
    #[serde(default)]
    pub forgers: Vec<String>,

    /// External JSON documents (file paths or `http(s)://` URLs) holding additional
    /// candidates as a JSON array of node URLs.
    #[serde(default)]
    pub external_forgers: Vec<String>,

    /// Minutes that must elapse since the last rotation before rotating again.
    pub shuffle_interval: u64,

    /// A replacement must report consensus strictly above this percentage.
    pub minimum_consensus: u8,

    /// Interval rotations only proceed when the delegate's position in the forging
    /// queue is at most this value.
    pub minimum_queue: usize,

    /// Attempts to re-enable forging on the active node before it is considered unhealthy.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Alert when the delegate's missed block count exceeds this value.
    #[serde(default)]
    pub missed_blocks: Option<u64>,

    /// Timeout applied to every network call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between attempts to re-enable forging (0 to retry immediately).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Location of the persisted rotation state.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Endpoint notified of alerts. When unset, alerts are only logged.
    #[serde(default)]
    pub webhook: Option<String>,
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Config = {
            let file = File::open(path)?;
            serde_yaml::from_reader(file)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.public_key.trim().is_empty() {
            return Err(Error::InvalidConfig("public_key must not be empty"));
        }
        if self.apis().is_empty() {
            return Err(Error::InvalidConfig("at least one api is required"));
        }
        if self.minimum_consensus > 100 {
            return Err(Error::InvalidConfig("minimum_consensus must be at most 100"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Normalized API endpoints.
    pub fn apis(&self) -> Pool {
        Pool::new(&self.apis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn shuffle_interval(&self) -> Duration {
        Duration::from_secs(self.shuffle_interval.saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use std::io::Write;

    const YAML: &str = r#"
public_key: "abc123"
password: "secret"
apis:
  - "http://api-1:7000/"
  - "http://api-2:7000"
forgers:
  - "http://forger-1:7000"
  - "http://forger-2:7000/"
shuffle_interval: 60
minimum_consensus: 51
minimum_queue: 10
"#;

    #[test_traced]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(
            config.retry_interval(),
            Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS)
        );
        assert_eq!(config.shuffle_interval(), Duration::from_secs(3600));
        assert_eq!(config.state_path, PathBuf::from("state/state.json"));
        assert!(config.external_forgers.is_empty());
        assert!(config.missed_blocks.is_none());
        assert!(config.webhook.is_none());
        assert_eq!(config.apis().len(), 2);
    }

    #[test_traced]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.public_key, "abc123");
        assert_eq!(config.minimum_consensus, 51);
    }

    #[test]
    fn test_invalid() {
        let base: Config = serde_yaml::from_str(YAML).unwrap();

        let mut config = base.clone();
        config.public_key = " ".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base.clone();
        config.apis = vec!["/".into()];
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base.clone();
        config.minimum_consensus = 101;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base;
        config.timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/rotator.yaml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}

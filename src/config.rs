//! Optional TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) is valid. Command-line flags override the file. The API secret is
//! deliberately not a config field: `[connection]` rejects unknown keys, so
//! an `api_secret` line fails loudly instead of being silently used.
//!
//! ```toml
//! [connection]
//! environment = "PROD05"
//! org_key = "ABCD1234"
//! org_id = "1035"
//! api_id = "XYZ987"
//!
//! [poll]
//! interval_secs = 5
//! timeout_secs = 600
//!
//! [export]
//! output_dir = "exports"
//! timestamp = true
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CbcError, Result};
use crate::poll::PollConfig;

/// File looked for in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "cbc-export.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub poll: Poll,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CbcError::Config(format!("reading config {}: {e}", path.display()))
        })?;
        Self::parse(&raw).map_err(|e| match e {
            CbcError::Config(msg) => CbcError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CbcError::Config(format!("parsing TOML: {e}")))
    }

    /// Loads `explicit` if given (it must exist), else [`DEFAULT_CONFIG_FILE`]
    /// if present, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default.exists() {
            Self::load(&default)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Connection {
    /// Environment code, e.g. `PROD05`.
    pub environment: Option<String>,
    /// Overrides the environment's base URL (proxies, test servers).
    pub base_url: Option<String>,
    pub org_key: Option<String>,
    /// Numeric org id, needed by the v5 audit log, API key and kit endpoints.
    pub org_id: Option<String>,
    pub api_id: Option<String>,
    /// Send `X-Org` on every request, not only on the services that need it.
    pub org_header: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Poll {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Derived from interval and timeout when unset.
    pub max_attempts: Option<u32>,
}

impl Default for Poll {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 600,
            max_attempts: None,
        }
    }
}

impl Poll {
    pub fn to_poll_config(&self) -> Result<PollConfig> {
        if self.interval_secs == 0 {
            return Err(CbcError::Config("poll.interval_secs must be at least 1".to_string()));
        }
        let config = PollConfig::new(
            Duration::from_secs(self.interval_secs),
            Duration::from_secs(self.timeout_secs),
        );
        Ok(match self.max_attempts {
            Some(n) => config.with_max_attempts(n),
            None => config,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Export {
    pub output_dir: PathBuf,
    /// Append `-YYYYmmdd-HHMMSS` to output file names.
    pub timestamp: bool,
}

impl Default for Export {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            timestamp: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

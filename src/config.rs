// src/config.rs

//! Executor configuration
//!
//! # Example executor.toml
//!
//! ```toml
//! apt_get_path = "/usr/bin/apt-get"
//! dpkg_options = ["--force-confold"]
//! apt_options = ["Acquire::Retries=3"]
//! conffile_helper = "/usr/share/debexec/helpers/conffile-prompt"
//! debconf_socket = "/run/debexec/debconf.sock"
//! watchdog_timeout_secs = 300
//! ```

use crate::conffile::DebconfFrontend;
use crate::error::{Error, Result};
use crate::watchdog::DEFAULT_WATCHDOG_TIMEOUT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default path for the executor config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/debexec/executor.toml";

/// `PATH` handed to apt-get and the conffile helper
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Environment variable carrying the requesting user's uid
pub const CALLER_UID_VAR: &str = "DEBEXEC_CALLER_UID";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// apt-get binary that drives dpkg and writes the `pmstatus` stream
    pub apt_get_path: PathBuf,
    /// Extra dpkg options, passed as `Dpkg::Options::=<opt>`
    pub dpkg_options: Vec<String>,
    /// Extra apt configuration items, passed as `-o <item>`
    pub apt_options: Vec<String>,
    /// Conffile decision helper
    pub conffile_helper: PathBuf,
    pub conffile_helper_timeout_secs: u64,
    /// Debconf passthrough socket; noninteractive when unset
    pub debconf_socket: Option<PathBuf>,
    /// Exported as LANG, LANGUAGE and LC_ALL so status text stays English
    pub locale: String,
    /// Exported as PATH
    pub path: String,
    /// Exported as DEBEXEC_CALLER_UID for audit logs
    pub caller_uid: Option<u32>,
    /// Seconds without status lines before a stall warning
    pub watchdog_timeout_secs: u64,
    /// Sleep between polling passes
    pub poll_interval_ms: u64,
    /// Bytes of terminal output kept for diagnostics
    pub tail_capacity: usize,
    /// Bytes of raw output used when no `E:` line is found
    pub fallback_excerpt_len: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            apt_get_path: PathBuf::from("/usr/bin/apt-get"),
            dpkg_options: Vec::new(),
            apt_options: Vec::new(),
            conffile_helper: PathBuf::from("/usr/share/debexec/helpers/conffile-prompt"),
            conffile_helper_timeout_secs: 3600,
            debconf_socket: None,
            locale: "C".to_string(),
            path: DEFAULT_PATH.to_string(),
            caller_uid: None,
            watchdog_timeout_secs: DEFAULT_WATCHDOG_TIMEOUT.as_secs(),
            poll_interval_ms: 5,
            tail_capacity: 2048,
            fallback_excerpt_len: 1200,
        }
    }
}

impl ExecutorConfig {
    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML config text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, the default file if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.watchdog_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "watchdog_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tail_capacity == 0 {
            return Err(Error::ConfigError(
                "tail_capacity must be greater than zero".to_string(),
            ));
        }
        if self.fallback_excerpt_len > self.tail_capacity {
            return Err(Error::ConfigError(format!(
                "fallback_excerpt_len ({}) exceeds tail_capacity ({})",
                self.fallback_excerpt_len, self.tail_capacity
            )));
        }
        if self.locale.is_empty() {
            return Err(Error::ConfigError("locale must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn conffile_helper_timeout(&self) -> Duration {
        Duration::from_secs(self.conffile_helper_timeout_secs)
    }

    pub fn debconf_frontend(&self) -> DebconfFrontend {
        DebconfFrontend::from_socket(self.debconf_socket.as_deref())
    }

    /// Sanitized environment for the dpkg child
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("PATH".to_string(), self.path.clone()),
            ("LANG".to_string(), self.locale.clone()),
            ("LANGUAGE".to_string(), self.locale.clone()),
            ("LC_ALL".to_string(), self.locale.clone()),
        ];
        env.extend(
            self.debconf_frontend()
                .env()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        );
        if let Some(uid) = self.caller_uid {
            env.push((CALLER_UID_VAR.to_string(), uid.to_string()));
        }
        env
    }
}

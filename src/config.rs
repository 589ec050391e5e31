//! Configuration for mongoprobe
//!
//! CLI arguments and environment variable handling using clap, plus the
//! probe options file (timeout, keep-alive, named sessions) loaded from JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::conn::EncryptionMode;
use crate::types::{ProbeError, Result};

/// Timeout range accepted for per-call operations, in seconds.
pub const TIMEOUT_MIN: u64 = 1;
pub const TIMEOUT_MAX: u64 = 30;

/// Keep-alive range for idle cached connections, in seconds.
pub const KEEP_ALIVE_MIN: u64 = 60;
pub const KEEP_ALIVE_MAX: u64 = 900;
pub const KEEP_ALIVE_DEFAULT: u64 = 60;

/// mongoprobe - MongoDB monitoring probe
///
/// Runs diagnostic commands against MongoDB targets over cached,
/// TLS-aware connections.
#[derive(Parser, Debug, Clone)]
#[command(name = "mongoprobe")]
#[command(about = "MongoDB monitoring probe with pooled sessions and TLS-aware dispatch")]
pub struct Args {
    /// Path to the probe options file (JSON)
    #[arg(long, env = "MONGOPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Global default timeout in seconds, used when the options file
    /// leaves its own timeout unset
    #[arg(long, env = "MONGOPROBE_TIMEOUT", default_value = "3")]
    pub timeout: u64,

    /// Metric key to export once; without it the probe serves JSON-lines
    /// requests on stdin
    pub key: Option<String>,

    /// Positional metric parameters
    pub params: Vec<String>,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.timeout < TIMEOUT_MIN || self.timeout > TIMEOUT_MAX {
            return Err(ProbeError::Config(format!(
                "timeout must be within {}..={} seconds, got {}",
                TIMEOUT_MIN, TIMEOUT_MAX, self.timeout
            )));
        }

        Ok(())
    }
}

/// One named set of connection settings from the options file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls_connect: String,
    #[serde(default)]
    pub tls_ca_file: String,
    #[serde(default)]
    pub tls_cert_file: String,
    #[serde(default)]
    pub tls_key_file: String,
}

/// Probe options as declared in the options file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeOptions {
    /// Seconds to wait for the server when connecting and on follow-up
    /// operations. Zero means "inherit the global timeout".
    #[serde(default)]
    pub timeout: u64,

    /// Seconds an unused connection may stay cached before it is closed.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Connection values used to fill fields a request leaves empty.
    #[serde(default)]
    pub default: Option<SessionConfig>,

    /// Pre-defined named sets of connection settings.
    #[serde(default)]
    pub sessions: HashMap<String, SessionConfig>,
}

fn default_keep_alive() -> u64 {
    KEEP_ALIVE_DEFAULT
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: 0,
            keep_alive: KEEP_ALIVE_DEFAULT,
            default: None,
            sessions: HashMap::new(),
        }
    }
}

impl ProbeOptions {
    /// Load options from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&raw)
            .map_err(|e| ProbeError::Config(format!("cannot parse {}: {}", path.display(), e)))?;

        Ok(options)
    }

    /// Check numeric ranges and session security modes. Runs before any
    /// connection attempt; a failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.timeout != 0 && (self.timeout < TIMEOUT_MIN || self.timeout > TIMEOUT_MAX) {
            return Err(ProbeError::Config(format!(
                "timeout must be within {}..={} seconds, got {}",
                TIMEOUT_MIN, TIMEOUT_MAX, self.timeout
            )));
        }

        if self.keep_alive < KEEP_ALIVE_MIN || self.keep_alive > KEEP_ALIVE_MAX {
            return Err(ProbeError::Config(format!(
                "keep_alive must be within {}..={} seconds, got {}",
                KEEP_ALIVE_MIN, KEEP_ALIVE_MAX, self.keep_alive
            )));
        }

        for (name, session) in &self.sessions {
            session.tls_connect.parse::<EncryptionMode>().map_err(|_| {
                ProbeError::Config(format!(
                    "session {:?}: incorrect tls connection type {:?}",
                    name, session.tls_connect
                ))
            })?;
        }

        Ok(())
    }

    /// Substitute the caller's global timeout when the file leaves the
    /// probe timeout unset.
    pub fn configure(&mut self, global_timeout: u64) {
        if self.timeout == 0 {
            self.timeout = global_timeout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options_from(json: &str) -> Result<ProbeOptions> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        ProbeOptions::load(file.path())
    }

    #[test]
    fn loads_full_options_file() {
        let options = options_from(
            r#"{
                "timeout": 10,
                "keep_alive": 300,
                "default": {"user": "monitor", "password": "secret"},
                "sessions": {
                    "prod": {
                        "uri": "tcp://db.example.com:27017",
                        "user": "zabbix",
                        "password": "hunter2",
                        "tls_connect": "verify_full",
                        "tls_ca_file": "/etc/ssl/ca.pem"
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(options.timeout, 10);
        assert_eq!(options.keep_alive, 300);
        assert_eq!(options.default.as_ref().unwrap().user, "monitor");
        let prod = &options.sessions["prod"];
        assert_eq!(prod.uri, "tcp://db.example.com:27017");
        assert_eq!(prod.tls_connect, "verify_full");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn empty_file_gets_defaults() {
        let options = options_from("{}").unwrap();
        assert_eq!(options.timeout, 0);
        assert_eq!(options.keep_alive, KEEP_ALIVE_DEFAULT);
        assert!(options.default.is_none());
        assert!(options.sessions.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(options_from(r#"{"timeot": 5}"#).is_err());
    }

    #[test]
    fn timeout_range_is_enforced() {
        let mut options = ProbeOptions::default();

        options.timeout = 31;
        assert!(options.validate().is_err());

        options.timeout = 30;
        assert!(options.validate().is_ok());

        // Zero is "unset", not out of range.
        options.timeout = 0;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn keep_alive_range_is_enforced() {
        let mut options = ProbeOptions::default();

        options.keep_alive = 59;
        assert!(options.validate().is_err());

        options.keep_alive = 901;
        assert!(options.validate().is_err());

        options.keep_alive = 900;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn session_mode_string_is_checked() {
        let mut options = ProbeOptions::default();
        options.sessions.insert(
            "bad".into(),
            SessionConfig {
                tls_connect: "verify".into(),
                ..Default::default()
            },
        );
        assert!(options.validate().is_err());

        options.sessions.get_mut("bad").unwrap().tls_connect = "verify_ca".into();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn configure_substitutes_global_timeout() {
        let mut options = ProbeOptions::default();
        options.configure(3);
        assert_eq!(options.timeout, 3);

        let mut options = ProbeOptions {
            timeout: 15,
            ..Default::default()
        };
        options.configure(3);
        assert_eq!(options.timeout, 15);
    }
}

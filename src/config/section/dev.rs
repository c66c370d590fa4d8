//! `[dev]` section configuration.
//!
//! Contains development server and watcher settings.
//!
//! # Example
//!
//! ```toml
//! [dev]
//! bind = "127.0.0.1"          # Network interface (0.0.0.0 = LAN accessible)
//! port = 8080                 # HTTP port number
//! host = ""                   # Host used in printed/opened URLs
//! ws_port = 35729             # Push channel port
//! watch_paths = ["src"]       # Roots watched for changes
//! debounce_ms = 300
//! skip_auto_open = false
//! resources = ["static"]      # Directories served as-is
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default push channel port.
pub const DEFAULT_WS_PORT: u16 = 35729;

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Network interface to bind.
    pub bind: IpAddr,

    /// HTTP port number.
    pub port: u16,

    /// Host name used in URLs. Empty derives it from `bind`.
    pub host: String,

    /// Port of the push channel listener.
    pub ws_port: u16,

    /// Roots watched for source changes.
    pub watch_paths: Vec<PathBuf>,

    /// Quiet period after the last change before a rebuild is requested.
    pub debounce_ms: u64,

    /// Minimum gap between two consecutive change batches.
    pub cooldown_ms: u64,

    /// How long teardown waits for an in-flight build.
    pub shutdown_grace_ms: u64,

    /// Don't open the system browser after start.
    pub skip_auto_open: bool,

    /// HTML page served at `/` instead of the built-in shell.
    pub custom_index_page: Option<PathBuf>,

    /// Static directories served at the root URL.
    pub resources: Vec<PathBuf>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8080,
            host: String::new(),
            ws_port: DEFAULT_WS_PORT,
            watch_paths: vec![PathBuf::from("src")],
            debounce_ms: 300,
            cooldown_ms: 800,
            shutdown_grace_ms: 2000,
            skip_auto_open: false,
            custom_index_page: None,
            resources: Vec::new(),
        }
    }
}

impl DevConfig {
    /// Host for printed and opened URLs.
    ///
    /// An unspecified bind address (`0.0.0.0`, `::`) maps to `127.0.0.1`.
    pub fn host(&self) -> String {
        if !self.host.is_empty() {
            return self.host.clone();
        }
        derive_host(self.bind)
    }
}

fn derive_host(bind: IpAddr) -> String {
    if bind.is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        bind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;
    use std::net::Ipv6Addr;

    #[test]
    fn test_dev_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.dev.port, 8080);
        assert_eq!(config.dev.debounce_ms, 300);
        assert_eq!(config.dev.watch_paths, vec![PathBuf::from("src")]);
        assert!(!config.dev.skip_auto_open);
    }

    #[test]
    fn test_dev_config_custom() {
        let config = test_parse_config(
            "[dev]\nbind = \"0.0.0.0\"\nport = 9000\nwatch_paths = [\"src\", \"assets\"]\nresources = [\"static\"]",
        );
        assert_eq!(config.dev.port, 9000);
        assert_eq!(config.dev.watch_paths.len(), 2);
        assert_eq!(config.dev.resources, vec![PathBuf::from("static")]);
    }

    #[test]
    fn test_host_derivation() {
        assert_eq!(derive_host(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), "127.0.0.1");
        assert_eq!(derive_host(IpAddr::V6(Ipv6Addr::UNSPECIFIED)), "127.0.0.1");
        assert_eq!(derive_host(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4))), "192.168.1.4");
    }

    #[test]
    fn test_explicit_host_wins() {
        let dev = DevConfig {
            host: "devbox.local".into(),
            ..Default::default()
        };
        assert_eq!(dev.host(), "devbox.local");
    }
}

//! `[test]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [test]
//! environment = "browser"     # command | browser | node
//! headless = true
//! runner = "wasmtime"         # overrides WASI runtime discovery
//! node_args = ["--stack-size=4096"]
//! timeout_secs = 0            # 0 = wait forever for browser results
//! ```

use serde::{Deserialize, Serialize};

use crate::runner::EnvironmentKind;

/// Test runner settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Execution environment for the test bundle.
    pub environment: EnvironmentKind,

    /// Drive the browser through WebDriver instead of opening it.
    pub headless: bool,

    /// WASI runtime program for the command environment.
    pub runner: Option<String>,

    /// Extra arguments passed to `node` before the harness.
    pub node_args: Vec<String>,

    /// Browser result timeout in seconds (0 disables it).
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_test_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.test.environment, EnvironmentKind::Command);
        assert!(!config.test.headless);
        assert!(config.test.runner.is_none());
    }

    #[test]
    fn test_test_config_browser() {
        let config = test_parse_config(
            "[test]\nenvironment = \"browser\"\nheadless = true\ntimeout_secs = 30",
        );
        assert_eq!(config.test.environment, EnvironmentKind::Browser);
        assert!(config.test.headless);
        assert_eq!(config.test.timeout_secs, 30);
    }

    #[test]
    fn test_test_config_rejects_unknown_environment() {
        let result: Result<TestConfig, _> = toml::from_str("environment = \"deno\"");
        assert!(result.is_err());
    }
}

//! Project configuration management for `wasmdev.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── build      # [build]
//! │   ├── dev        # [dev]
//! │   └── test       # [test]
//! ├── error.rs       # ConfigError
//! ├── util.rs        # config discovery, path resolution
//! └── mod.rs         # Config (this file)
//! ```
//!
//! The file is optional: without one every section uses its defaults and
//! the current directory is the project root.

mod error;
pub mod section;
mod util;

pub use error::ConfigError;
pub use section::{BuildConfig, DevConfig, TestConfig};
pub use util::normalize_path;

use util::{find_config_file, resolve_against};

use crate::{
    cli::{BuildArgs, Cli, Commands, ServeArgs},
    log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Upper bound for the debounce window.
const MAX_DEBOUNCE_MS: u64 = 10_000;

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing wasmdev.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Project root directory - parent of config file, or cwd (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Development server settings
    #[serde(default)]
    pub dev: DevConfig,

    /// Test runner settings
    #[serde(default)]
    pub test: TestConfig,
}

impl Config {
    /// Load configuration for the given CLI invocation.
    ///
    /// Searches upward from cwd for the config file. The project root is the
    /// directory holding it (cwd when no file exists). CLI options override
    /// file values.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config, &cwd) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.root = path.parent().map(Path::to_path_buf).unwrap_or(cwd);
                config.config_path = Some(normalize_path(&path));
                config
            }
            None => Self {
                root: cwd,
                ..Self::default()
            },
        };

        config.root = normalize_path(&config.root);
        config.normalize_paths();
        config.apply_command_options(&cli.command);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::from)?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {} (ignored): {}", display_path, fields.join(", "));
    }

    // ========================================================================
    // cli configuration updates
    // ========================================================================

    /// Apply command-specific configuration options.
    fn apply_command_options(&mut self, command: &Commands) {
        match command {
            Commands::Dev {
                build_args,
                serve_args,
                watch_paths,
                skip_auto_open,
                custom_index_page,
                resources,
                debounce,
            } => {
                self.apply_build_args(build_args);
                self.apply_serve_args(serve_args);
                for path in watch_paths {
                    self.dev.watch_paths.push(resolve_against(&self.root, path));
                }
                for path in resources {
                    self.dev.resources.push(resolve_against(&self.root, path));
                }
                if let Some(page) = custom_index_page {
                    self.dev.custom_index_page = Some(resolve_against(&self.root, page));
                }
                self.dev.skip_auto_open |= *skip_auto_open;
                Self::update_option(&mut self.dev.debounce_ms, debounce.as_ref());
            }
            Commands::Test {
                build_args,
                serve_args,
                environment,
                headless,
                node_args,
                ..
            } => {
                self.apply_build_args(build_args);
                self.apply_serve_args(serve_args);
                Self::update_option(&mut self.test.environment, environment.as_ref());
                self.test.headless |= *headless;
                self.test.node_args.extend(node_args.iter().cloned());
            }
            Commands::BuildExecutor(_) => {}
        }
    }

    fn apply_build_args(&mut self, args: &BuildArgs) {
        if args.product.is_some() {
            self.build.product = args.product.clone();
        }
        self.build.release |= args.release;
        Self::update_option(&mut self.build.target, args.target.as_ref());
    }

    fn apply_serve_args(&mut self, args: &ServeArgs) {
        Self::update_option(&mut self.dev.bind, args.bind.as_ref());
        Self::update_option(&mut self.dev.port, args.port.as_ref());
        Self::update_option(&mut self.dev.host, args.host.as_ref());
    }

    /// Update config option if CLI value is provided.
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    // ========================================================================
    // path normalization
    // ========================================================================

    /// Resolve all configured paths against the project root.
    fn normalize_paths(&mut self) {
        let root = self.root.clone();
        self.build.manifest_dir = normalize_path(&resolve_against(&root, &self.build.manifest_dir));
        self.dev.watch_paths = self
            .dev
            .watch_paths
            .iter()
            .map(|p| resolve_against(&root, p))
            .collect();
        self.dev.resources = self
            .dev
            .resources
            .iter()
            .map(|p| resolve_against(&root, p))
            .collect();
        if let Some(page) = self.dev.custom_index_page.take() {
            self.dev.custom_index_page = Some(resolve_against(&root, &page));
        }
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Validate value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.dev.port == 0 {
            return Err(ConfigError::Validation("`dev.port` must not be 0".into()).into());
        }
        if self.dev.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Validation(format!(
                "`dev.debounce_ms` must be at most {MAX_DEBOUNCE_MS}"
            ))
            .into());
        }
        if self.build.command.is_empty() {
            return Err(ConfigError::Validation("`build.command` must not be empty".into()).into());
        }
        if self.test.headless && self.test.environment != crate::runner::EnvironmentKind::Browser {
            return Err(ConfigError::Validation(
                "`--headless` is only supported with the browser environment".into(),
            )
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config from a TOML fragment.
/// Panics if there are unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> Config {
    let (parsed, ignored) = Config::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::EnvironmentKind;
    use clap::Parser;

    fn config_for(args: &[&str]) -> Config {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut config = Config {
            root: PathBuf::from("/project"),
            ..Config::default()
        };
        config.normalize_paths();
        config.apply_command_options(&cli.command);
        config
    }

    #[test]
    fn test_from_str_invalid_toml() {
        assert!(Config::from_str("[build\nrelease = true").is_err());
    }

    #[test]
    fn test_unknown_fields_detected() {
        let content = "[dev]\nport = 9000\n[unknown_section]\nfield = \"value\"";
        let (config, ignored) = Config::parse_with_ignored(content).unwrap();
        assert_eq!(config.dev.port, 9000);
        assert!(ignored.iter().any(|f| f.contains("unknown_section")));
    }

    #[test]
    fn test_cli_overrides_dev() {
        let config = config_for(&[
            "wasmdev", "dev", "--port", "9100", "--debounce", "50", "-w", "assets",
            "--release",
        ]);
        assert_eq!(config.dev.port, 9100);
        assert_eq!(config.dev.debounce_ms, 50);
        assert!(config.build.release);
        assert!(config.dev.watch_paths.contains(&PathBuf::from("/project/assets")));
        assert!(config.dev.watch_paths.contains(&PathBuf::from("/project/src")));
    }

    #[test]
    fn test_cli_overrides_test() {
        let config = config_for(&["wasmdev", "test", "-e", "browser", "--headless"]);
        assert_eq!(config.test.environment, EnvironmentKind::Browser);
        assert!(config.test.headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_headless_requires_browser() {
        let config = config_for(&["wasmdev", "test", "-e", "node", "--headless"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port_and_long_debounce() {
        let mut config = test_parse_config("[dev]\nport = 0");
        assert!(config.validate().is_err());
        config.dev.port = 8080;
        config.dev.debounce_ms = MAX_DEBOUNCE_MS + 1;
        assert!(config.validate().is_err());
    }
}

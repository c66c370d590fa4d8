//! `[build]` section configuration.
//!
//! Describes how the out-of-process executor compiles the project.
//!
//! # Example
//!
//! ```toml
//! [build]
//! product = "app"               # binary target; defaults to the project dir name
//! release = false
//! target = "wasm32-wasip1"
//! command = ["cargo", "build"]  # target/profile/bin arguments are appended
//! manifest_dir = "."
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default compilation target triple.
pub const DEFAULT_TARGET: &str = "wasm32-wasip1";

/// Build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Binary target to build. `None` uses the project directory name.
    pub product: Option<String>,

    /// Build with `--release`.
    pub release: bool,

    /// Target triple passed to the build command.
    pub target: String,

    /// Build command (program + leading args).
    pub command: Vec<String>,

    /// Directory the build command runs in.
    pub manifest_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            product: None,
            release: false,
            target: DEFAULT_TARGET.to_string(),
            command: vec!["cargo".into(), "build".into()],
            manifest_dir: PathBuf::from("."),
        }
    }
}

impl BuildConfig {
    /// Product name, falling back to the manifest directory name.
    pub fn product_name(&self) -> String {
        if let Some(product) = &self.product {
            return product.clone();
        }
        self.manifest_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string())
    }

    /// Cargo profile directory name.
    pub fn profile_dir(&self) -> &'static str {
        if self.release { "release" } else { "debug" }
    }

    /// Path of the compiled module produced by a successful build.
    pub fn artifact_path(&self) -> PathBuf {
        let target_dir = std::env::var_os("CARGO_TARGET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.manifest_dir.join("target"));
        artifact_in(&target_dir, &self.target, self.profile_dir(), &self.product_name())
    }
}

fn artifact_in(target_dir: &Path, triple: &str, profile: &str, product: &str) -> PathBuf {
    target_dir
        .join(triple)
        .join(profile)
        .join(format!("{product}.wasm"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_build_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.build.target, "wasm32-wasip1");
        assert_eq!(config.build.command, vec!["cargo", "build"]);
        assert!(!config.build.release);
        assert!(config.build.product.is_none());
    }

    #[test]
    fn test_build_config_custom() {
        let config = test_parse_config(
            "[build]\nproduct = \"demo\"\nrelease = true\ntarget = \"wasm32-unknown-unknown\"\ncommand = [\"cargo\", \"+nightly\", \"build\"]",
        );
        assert_eq!(config.build.product_name(), "demo");
        assert_eq!(config.build.profile_dir(), "release");
        assert_eq!(config.build.command.len(), 3);
    }

    #[test]
    fn test_product_name_falls_back_to_dir() {
        let build = BuildConfig {
            manifest_dir: PathBuf::from("/work/my-app"),
            ..Default::default()
        };
        assert_eq!(build.product_name(), "my-app");
    }

    #[test]
    fn test_artifact_layout() {
        let path = artifact_in(Path::new("/p/target"), "wasm32-wasip1", "debug", "app");
        assert_eq!(path, PathBuf::from("/p/target/wasm32-wasip1/debug/app.wasm"));
    }
}

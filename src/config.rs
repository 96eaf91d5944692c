//! Configuration loading and schema definitions for dfsfleet.
//!
//! One TOML file configures both halves of the system: the `[compute]`
//! section is read by `dfsfleet serve` on each replica, the `[dispatch]`,
//! `[generator]` and `[report]` sections by the streaming driver. Every
//! section is optional and falls back to defaults.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use dfsfleet::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("dfsfleet.toml"))?;
/// println!("Replicas: {:?}", config.dispatch.replicas);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// # Example
///
/// ```
/// use dfsfleet::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [dispatch]
///     replicas = ["10.0.0.1:50051", "10.0.0.2:50051"]
///
///     [generator]
///     requests_per_second = 25.0
/// "#)?;
///
/// assert_eq!(config.dispatch.replicas.len(), 2);
/// assert_eq!(config.generator.requests_per_second, 25.0);
/// assert_eq!(config.generator.duration_secs, 60);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if given, otherwise returns the default configuration.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

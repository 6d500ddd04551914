// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! luhp project configuration.
//!
//! Configuration is loaded from `luhp.toml` in the working directory.
//!
//! # Example Configuration
//!
//! ```toml
//! [project]
//! name = "my-site"
//!
//! [templates]
//! root = "templates"
//!
//! [engine]
//! autoescape = true
//! cache_size = 200
//! max_include_depth = 16
//! ```

use luhp::EngineOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "luhp.toml";

/// Main configuration structure loaded from `luhp.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Where templates are looked up.
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Engine behaviour, see [`EngineOptions`].
    #[serde(default)]
    pub engine: EngineOptions,
}

/// Project metadata configuration.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    #[serde(default = "default_name")]
    pub name: String,
}

/// Template lookup configuration.
#[derive(Debug, Deserialize)]
pub struct TemplatesConfig {
    /// Resolver root; template paths on the command line are relative to it
    /// (default: ".").
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { name: default_name() }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

impl Config {
    /// Loads configuration from `luhp.toml` in the current directory.
    ///
    /// If no configuration file exists, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Loads `luhp.toml` from `dir`; a relative `templates.root` is taken
    /// relative to `dir`.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::debug!("no {} in {}, using defaults", CONFIG_FILE, dir.display());
            let mut config = Config::default();
            config.templates.root = dir.join(&config.templates.root);
            return Ok(config);
        }

        let content = fs::read_to_string(&config_path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", config_path.display(), e))?;
        config.templates.root = dir.join(&config.templates.root);
        config.engine.validate()?;

        tracing::debug!("loaded {} for project {}", config_path.display(), config.project.name);
        Ok(config)
    }
}

use std::{env, path::Path};

use anyhow::{Context, Result, bail};
use codap_channel::{Dimensions, InteractiveFrame};
use tracing::{info, warn};

use crate::catalog::DEFAULT_TMDB_BASE_URL;
use crate::dataset::DEFAULT_DATASET_NAME;

pub const DEFAULT_PLUGIN_NAME: &str = "Movie Finder";
pub const DEFAULT_PLUGIN_VERSION: &str = "0.1";
pub const DEFAULT_WIDTH: u32 = 400;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Everything the plugin needs to know before it talks to anyone.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub dataset_name: String,
    pub plugin_name: String,
    pub plugin_title: String,
    pub plugin_version: String,
    pub dimensions: Dimensions,
    pub tmdb_base_url: String,
    pub tmdb_api_key: Option<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dataset_name: DEFAULT_DATASET_NAME.to_string(),
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            plugin_title: DEFAULT_PLUGIN_NAME.to_string(),
            plugin_version: DEFAULT_PLUGIN_VERSION.to_string(),
            dimensions: Dimensions {
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
            },
            tmdb_base_url: DEFAULT_TMDB_BASE_URL.to_string(),
            tmdb_api_key: None,
        }
    }
}

impl PluginConfig {
    /// Loads `env_file` (if it exists) into the environment, then reads the
    /// configuration from the environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) if path.exists() => {
                dotenvy::from_path(path)
                    .with_context(|| format!("could not load {}", path.display()))?;
                info!("Loaded .env from {}", path.display());
            }
            Some(path) => warn!("could not load .env from {}", path.display()),
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("CODAP_DATASET_NAME") {
            if v.contains(']') {
                bail!("CODAP_DATASET_NAME may not contain ']'");
            }
            cfg.dataset_name = v;
        }
        if let Some(v) = non_empty("CODAP_PLUGIN_NAME") {
            cfg.plugin_title = v.clone();
            cfg.plugin_name = v;
        }
        if let Some(v) = non_empty("CODAP_PLUGIN_TITLE") {
            cfg.plugin_title = v;
        }
        if let Some(v) = non_empty("CODAP_PLUGIN_VERSION") {
            cfg.plugin_version = v;
        }
        if let Some(v) = non_empty("CODAP_PLUGIN_WIDTH") {
            cfg.dimensions.width = v
                .trim()
                .parse()
                .with_context(|| format!("CODAP_PLUGIN_WIDTH is not a number: {v}"))?;
        }
        if let Some(v) = non_empty("CODAP_PLUGIN_HEIGHT") {
            cfg.dimensions.height = v
                .trim()
                .parse()
                .with_context(|| format!("CODAP_PLUGIN_HEIGHT is not a number: {v}"))?;
        }
        if let Some(v) = non_empty("TMDB_BASE_URL") {
            cfg.tmdb_base_url = v;
        }
        cfg.tmdb_api_key = non_empty("TMDB_API_KEY");
        Ok(cfg)
    }

    /// Handshake manifest announced to the host.
    pub fn manifest(&self) -> InteractiveFrame {
        InteractiveFrame {
            name: self.plugin_name.clone(),
            title: self.plugin_title.clone(),
            dimensions: self.dimensions,
            version: self.plugin_version.clone(),
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        match self.tmdb_api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("TMDB_API_KEY is not set"),
        }
    }
}

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ScopeLevel, ScoringOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub storage: StorageConfig,
    pub scoring: ScoringConfig,
    pub scopes: ScopeWeights,
    pub tags: TagConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root directory holding per-scope indexes, relationship files,
    /// and the tag cache.
    pub root: PathBuf,
}

/// Named weight presets selectable from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPreset {
    Default,
    EmbeddingFocused,
    TagFocused,
    SimilarityOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    pub preset: ScoringPreset,
    pub minimum_score: f64,
    pub recency_half_life_days: f64,
}

/// Per-level score multipliers plus the optional workspace this
/// deployment's projects inherit from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeWeights {
    pub project: f64,
    pub workspace: f64,
    pub global: f64,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagConfig {
    /// When false, tag scoring uses the neutral no-op provider.
    pub enabled: bool,
    pub max_age_days: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid scope weight: {0} (must be in (0, 1])")]
    InvalidWeight(f64),
    #[error("Invalid recency half-life: {0} (must be positive)")]
    InvalidHalfLife(f64),
    #[error("Invalid minimum score: {0} (must be in [0, 1])")]
    InvalidMinimumScore(f64),
    #[error("Invalid tag cache max age: {0} (must be between 1 and 365)")]
    InvalidMaxAge(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                root: Self::config_dir()
                    .map(|dir| dir.join("store"))
                    .unwrap_or_else(|_| PathBuf::from(".docstore")),
            },
            scoring: ScoringConfig {
                preset: ScoringPreset::Default,
                minimum_score: 0.0,
                recency_half_life_days: 30.0,
            },
            scopes: ScopeWeights::default(),
            tags: TagConfig {
                enabled: true,
                max_age_days: 30,
            },
        }
    }
}

impl Config {
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".docstore-rank"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    #[inline]
    pub fn load() -> Result<Self> {
        let config_path =
            Self::config_file_path().context("Failed to determine config file path")?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = Self::config_dir().context("Failed to determine config directory")?;
        fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scopes.validate()?;
        if self.scoring.recency_half_life_days <= 0.0 {
            return Err(ConfigError::InvalidHalfLife(
                self.scoring.recency_half_life_days,
            ));
        }
        if !(0.0..=1.0).contains(&self.scoring.minimum_score) {
            return Err(ConfigError::InvalidMinimumScore(self.scoring.minimum_score));
        }
        if self.tags.max_age_days == 0 || self.tags.max_age_days > 365 {
            return Err(ConfigError::InvalidMaxAge(self.tags.max_age_days));
        }
        Ok(())
    }

    /// Scoring options for the configured preset, with the config's
    /// cutoff and half-life applied.
    #[inline]
    pub fn scoring_options(&self) -> ScoringOptions {
        let base = match self.scoring.preset {
            ScoringPreset::Default => ScoringOptions::default(),
            ScoringPreset::EmbeddingFocused => ScoringOptions::embedding_focused(),
            ScoringPreset::TagFocused => ScoringOptions::tag_focused(),
            ScoringPreset::SimilarityOnly => ScoringOptions::similarity_only(),
        };
        ScoringOptions {
            minimum_score: self.scoring.minimum_score,
            recency_half_life_days: self.scoring.recency_half_life_days,
            ..base
        }
    }
}

impl ScopeWeights {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for weight in [self.project, self.workspace, self.global] {
            if !(weight > 0.0 && weight <= 1.0) {
                return Err(ConfigError::InvalidWeight(weight));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn for_level(&self, level: ScopeLevel) -> f64 {
        match level {
            ScopeLevel::Project => self.project,
            ScopeLevel::Workspace => self.workspace,
            ScopeLevel::Global => self.global,
        }
    }
}

impl Default for ScopeWeights {
    #[inline]
    fn default() -> Self {
        Self {
            project: 1.0,
            workspace: 0.8,
            global: 0.6,
            workspace_id: None,
        }
    }
}

//! Configuration settings for Referat.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub prompts: PromptSettings,
}

/// LLM invocation settings shared by all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model identifier passed to the chat completion API.
    pub model: String,
    /// Sampling temperature for all stage calls.
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            temperature: 0.3,
        }
    }
}

/// Pipeline resilience and heuristic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Additional attempts after the first failed one.
    pub max_retries: usize,
    /// Base backoff delay in milliseconds, doubled per retry (1s, 2s, 4s).
    pub retry_base_delay_ms: u64,
    /// Warn when clustered utterances cover less than this share of the input.
    pub coverage_warn_ratio: f64,
    /// Collapse the diarization fallback to one speaker above this alternation share.
    pub alternation_collapse_ratio: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            coverage_warn_ratio: 0.8,
            alternation_collapse_ratio: 0.3,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ReferatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("referat")
            .join("config.toml")
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(crate::error::ReferatError::Config(
                "llm.model must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(crate::error::ReferatError::Config(format!(
                "llm.temperature must be within [0.0, 2.0], got {}",
                self.llm.temperature
            )));
        }
        if self.pipeline.retry_base_delay_ms == 0 {
            return Err(crate::error::ReferatError::Config(
                "pipeline.retry_base_delay_ms must be at least 1".to_string(),
            ));
        }
        for (name, ratio) in [
            ("coverage_warn_ratio", self.pipeline.coverage_warn_ratio),
            (
                "alternation_collapse_ratio",
                self.pipeline.alternation_collapse_ratio,
            ),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(crate::error::ReferatError::Config(format!(
                    "pipeline.{} must be within (0.0, 1.0], got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }

    /// Heuristic thresholds for stage normalization and fallbacks.
    pub fn heuristics(&self) -> crate::stage::Heuristics {
        crate::stage::Heuristics {
            coverage_warn_ratio: self.pipeline.coverage_warn_ratio,
            alternation_collapse_ratio: self.pipeline.alternation_collapse_ratio,
        }
    }

    /// Retry policy for the stage runners.
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_retries: self.pipeline.max_retries,
            base_delay: Duration::from_millis(self.pipeline.retry_base_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.llm.model, "gpt-5");
        assert_eq!(settings.pipeline.max_retries, 3);
        assert_eq!(settings.pipeline.retry_base_delay_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut settings = Settings::default();
        settings.pipeline.coverage_warn_ratio = 1.5;
        assert!(settings.validate().is_err());

        settings.pipeline.coverage_warn_ratio = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_delay() {
        let mut settings = Settings::default();
        settings.pipeline.retry_base_delay_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.llm.model = "gpt-5-mini".to_string();
        settings.pipeline.max_retries = 1;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.llm.model, "gpt-5-mini");
        assert_eq!(loaded.pipeline.max_retries, 1);
        // Untouched sections keep their defaults.
        assert_eq!(loaded.pipeline.coverage_warn_ratio, 0.8);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.llm.model, "gpt-5");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\nretry_base_delay_ms = 0\n").unwrap();
        assert!(Settings::load_from(Some(&path)).is_err());
    }
}

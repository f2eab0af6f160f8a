//! Configuration for the learning core
//!
//! Every section carries working defaults; a TOML file only needs the
//! values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::adaptation::AdaptationConfig;
use crate::embeddings::DEFAULT_DIMENSION;
use crate::error::{LearningError, Result};
use crate::feedback::FeedbackConfig;
use crate::knowledge::KnowledgeConfig;
use crate::memory::MemoryConfig;
use crate::preferences::PreferenceConfig;
use crate::validation::ValidationConfig;

/// Main configuration for the learning core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Dimension of the default hashing embedder
    pub embedding_dimension: usize,

    pub memory: MemoryConfig,

    pub preferences: PreferenceConfig,

    pub knowledge: KnowledgeConfig,

    pub feedback: FeedbackConfig,

    pub adaptation: AdaptationConfig,

    pub validation: ValidationConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: DEFAULT_DIMENSION,
            memory: MemoryConfig::default(),
            preferences: PreferenceConfig::default(),
            knowledge: KnowledgeConfig::default(),
            feedback: FeedbackConfig::default(),
            adaptation: AdaptationConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LearningError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LearningError::Config { message: format!("failed to parse config: {}", e) })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LearningError::Config { message: format!("failed to serialize config: {}", e) })
    }

    fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(LearningError::Config { message: "embedding_dimension must be positive".into() });
        }
        let weights = self.memory.similarity_weight + self.memory.importance_weight + self.memory.recency_weight;
        if (weights - 1.0).abs() > 1e-3 {
            return Err(LearningError::Config {
                message: format!("memory scoring weights must sum to 1, got {:.3}", weights),
            });
        }
        if self.validation.timeout_hours < 0 {
            return Err(LearningError::Config { message: "validation.timeout_hours must not be negative".into() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoreConfig::from_toml(
            r#"
            [feedback]
            min_occurrences = 5

            [validation]
            auto_approve_low_risk = false
            "#,
        )
        .unwrap();

        assert_eq!(config.feedback.min_occurrences, 5);
        assert_eq!(config.feedback.long_response_chars, 2000);
        assert!(!config.validation.auto_approve_low_risk);
        assert_eq!(config.validation.timeout_hours, 24);
        assert_eq!(config.embedding_dimension, DEFAULT_DIMENSION);
        assert_eq!(config.adaptation.gradual_steps, 5);
    }

    #[test]
    fn test_rejects_bad_weights() {
        let err = CoreConfig::from_toml("[memory]\nsimilarity_weight = 0.9\n").unwrap_err();
        assert!(matches!(err, LearningError::Config { .. }));
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = CoreConfig::default().to_toml().unwrap();
        let parsed = CoreConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.knowledge.merge_threshold, 0.92);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = CoreConfig::load(Path::new("/nonexistent/mnemo.toml")).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
    }
}

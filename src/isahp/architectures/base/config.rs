use serde::{Deserialize, Serialize};

/// Configuration for the self-attentive Hawkes process model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of event types (K). Must be set by user.
    pub n_types: usize,

    /// Dimension of the event-type embedding
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Model dimension fed to the attention projector.
    /// Each event feature is a time-gap scalar concatenated with a type
    /// embedding, so this must equal 1 + embedding_dim.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// Dropout applied to attention probabilities
    #[serde(default)]
    pub dropout: f64,

    /// Number of attention heads. The first half of the heads drives the
    /// excitation magnitudes, the second half the decay rates, so this
    /// must be even.
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,

    /// Seed for deterministic parameter initialization and Monte-Carlo draws
    #[serde(default)]
    pub seed: u64,
}

fn default_embedding_dim() -> usize {
    59
}
fn default_hidden_size() -> usize {
    60
}
fn default_num_heads() -> usize {
    6
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_types: 0, // Must be set by user
            embedding_dim: default_embedding_dim(),
            hidden_size: default_hidden_size(),
            dropout: 0.0,
            num_heads: default_num_heads(),
            seed: 0,
        }
    }
}

impl ModelConfig {
    /// Create a config for `n_types` event types with the library defaults.
    pub fn new(n_types: usize) -> Self {
        Self {
            n_types,
            ..Self::default()
        }
    }

    /// Validate consistency of configuration
    pub fn validate_consistent(&self) -> Result<(), String> {
        if self.n_types == 0 {
            return Err("n_types must be positive".to_string());
        }
        if self.num_heads == 0 || self.num_heads % 2 != 0 {
            return Err(format!(
                "num_heads must be a positive even number, got {}",
                self.num_heads
            ));
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(format!(
                "hidden_size {} must be divisible by num_heads {}",
                self.hidden_size, self.num_heads
            ));
        }
        if self.hidden_size != 1 + self.embedding_dim {
            return Err(format!(
                "hidden_size {} must equal 1 + embedding_dim {} (time gap + type embedding)",
                self.hidden_size, self.embedding_dim
            ));
        }
        Ok(())
    }

    /// Per-head feature dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Number of heads in each of the two semantic groups
    pub fn half_heads(&self) -> usize {
        self.num_heads / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.embedding_dim, 59);
        assert_eq!(config.hidden_size, 60);
        assert_eq!(config.num_heads, 6);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.seed, 0);
    }

    #[test]
    fn test_validate_consistent() {
        let mut config = ModelConfig::new(5);

        // Defaults are valid: 60 = 1 + 59, 60 % 6 == 0
        assert!(config.validate_consistent().is_ok());

        // hidden_size not divisible by num_heads
        config.hidden_size = 61;
        config.embedding_dim = 60;
        assert!(config.validate_consistent().is_err());

        // Odd head count
        config = ModelConfig::new(5);
        config.num_heads = 5;
        assert!(config.validate_consistent().is_err());

        // hidden_size inconsistent with embedding_dim
        config = ModelConfig::new(5);
        config.embedding_dim = 10;
        assert!(config.validate_consistent().is_err());

        // Zero types
        config = ModelConfig::new(0);
        assert!(config.validate_consistent().is_err());
    }

    #[test]
    fn test_head_split_constants() {
        let mut config = ModelConfig::new(3);
        config.embedding_dim = 5;
        config.hidden_size = 6;
        config.num_heads = 2;
        assert!(config.validate_consistent().is_ok());
        assert_eq!(config.head_dim(), 3);
        assert_eq!(config.half_heads(), 1);
    }

    #[test]
    fn test_serialization() {
        let config = ModelConfig::new(4);
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: ModelConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(config.n_types, deserialized.n_types);
        assert_eq!(config.hidden_size, deserialized.hidden_size);
        assert_eq!(config.num_heads, deserialized.num_heads);
    }

    #[test]
    fn test_defaults_from_partial_json() {
        let config: ModelConfig = serde_json::from_str(r#"{"n_types": 7}"#).unwrap();
        assert_eq!(config.n_types, 7);
        assert_eq!(config.hidden_size, 60);
        assert_eq!(config.num_heads, 6);
    }
}

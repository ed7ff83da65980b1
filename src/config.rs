//! Engine configuration

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_RELATION_DEPTH: usize = 32;

/// Tunables for evaluation and batch recompute.
///
/// Loadable from YAML; every field is optional there:
///
/// ```yaml
/// timeout_ms: 500       # per-cell bound, null for none
/// parallel: true        # fan rows out across threads
/// max_relation_depth: 8 # nested lookup/rollup hops per cell
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub timeout_ms: Option<u64>,
    pub parallel: bool,
    pub max_relation_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            parallel: true,
            max_relation_depth: DEFAULT_MAX_RELATION_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_relation_depth(mut self, depth: usize) -> Self {
        self.max_relation_depth = depth;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.timeout_ms == Some(0) {
            return Err(EngineError::InvalidConfig(
                "timeout_ms must be positive (use null for no timeout)".to_string(),
            ));
        }
        if self.max_relation_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "max_relation_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout_ms, Some(2_000));
        assert!(config.parallel);
        assert_eq!(config.max_relation_depth, 32);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("parallel: false\n").unwrap();
        assert!(!config.parallel);
        assert_eq!(config.timeout_ms, Some(2_000));

        let config = EngineConfig::from_yaml_str("timeout_ms: null\n").unwrap();
        assert_eq!(config.timeout_ms, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_yaml_str("timeout_ms: 0\n").is_err());
        assert!(EngineConfig::from_yaml_str("max_relation_depth: 0\n").is_err());
        assert!(EngineConfig::from_yaml_str("threads: 4\n").is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms: 150\nmax_relation_depth: 4").unwrap();
        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(
            config,
            EngineConfig::default()
                .with_timeout_ms(Some(150))
                .with_max_relation_depth(4)
        );
    }
}

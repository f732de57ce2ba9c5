//! Program configuration
//!
//! Deserializable settings for a single b-program run: identity, daemon
//! behavior, the deterministic random seed, and the optional per-cycle
//! wall-clock budget.

use serde::Deserialize;

/// Configuration for a b-program and its runner.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    /// Program name, used in logs and listener callbacks
    #[serde(default = "default_name")]
    pub name: String,
    /// Whether the program waits for external events instead of
    /// terminating when nothing is selectable
    #[serde(default)]
    pub daemon: bool,
    /// Seed for the program-owned deterministic random source.
    /// Bodies never see the platform RNG, so runs replay exactly.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// Optional wall-clock budget per superstep, in milliseconds
    #[serde(default)]
    pub cycle_timeout_ms: Option<u64>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            daemon: false,
            random_seed: default_random_seed(),
            cycle_timeout_ms: None,
        }
    }
}

impl ProgramConfig {
    /// Default configuration under a custom program name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

fn default_name() -> String {
    "bprogram".to_string()
}

fn default_random_seed() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProgramConfig::default();
        assert_eq!(config.name, "bprogram");
        assert!(!config.daemon);
        assert_eq!(config.random_seed, 0);
        assert_eq!(config.cycle_timeout_ms, None);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: ProgramConfig =
            serde_json::from_str(r#"{"name":"traffic","daemon":true}"#).expect("config");
        assert_eq!(config.name, "traffic");
        assert!(config.daemon);
        assert_eq!(config.random_seed, 0);
        assert_eq!(config.cycle_timeout_ms, None);
    }

    #[test]
    fn test_full_deserialization() {
        let config: ProgramConfig = serde_json::from_str(
            r#"{"name":"sim","daemon":false,"random_seed":42,"cycle_timeout_ms":250}"#,
        )
        .expect("config");
        assert_eq!(config.random_seed, 42);
        assert_eq!(config.cycle_timeout_ms, Some(250));
    }
}

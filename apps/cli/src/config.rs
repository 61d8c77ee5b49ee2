//! CLI configuration loading.
//!
//! Settings come from an optional TOML file; individual CLI flags
//! override fields after loading.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Training settings for the demo model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Hidden layer width.
    pub hidden: usize,
    /// Seed for parameter initialization.
    pub seed: u64,
    /// Optimization steps per `train` invocation.
    pub steps: u64,
    /// Loss reporting cadence; 0 disables reports.
    pub print_every: u64,
    /// SGD learning rate.
    pub learning_rate: f32,
    /// Checkpoint history kept on disk.
    pub max_to_keep: usize,
    /// Mid-run checkpoint cadence in steps.
    pub save_every: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hidden: 8,
            seed: 42,
            steps: 2000,
            print_every: 100,
            learning_rate: 0.5,
            max_to_keep: 5,
            save_every: None,
        }
    }
}

/// Loads settings from `path`, or defaults when no file is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let settings = load(None).unwrap();
        assert_eq!(settings.hidden, 8);
        assert_eq!(settings.steps, 2000);
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.toml");
        std::fs::write(&path, "steps = 50\nlearning_rate = 0.1\n").unwrap();

        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.steps, 50);
        assert!((settings.learning_rate - 0.1).abs() < f32::EPSILON);
        assert_eq!(settings.hidden, 8);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.toml");
        std::fs::write(&path, "stepz = 50\n").unwrap();

        assert!(load(Some(&path)).is_err());
    }
}

//! Process-wide configuration (spec.md §6 ambient stack), loaded from an
//! optional `gots.toml` the way the teacher's [`crate::project`] loads
//! `lang.toml`: a missing file falls back to defaults rather than erroring.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotsConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub arena: ArenaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker count for the goroutine scheduler (spec.md §4.7). `None`
    /// keeps the default of one worker per hardware core.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Lower bound clamp for the timer system's sleep granularity
    /// (spec.md §4.9), in milliseconds.
    #[serde(default = "default_min_timer_resolution_ms")]
    pub min_timer_resolution_ms: u64,
    /// Upper bound clamp for the same sleep, in milliseconds.
    #[serde(default = "default_max_timer_resolution_ms")]
    pub max_timer_resolution_ms: u64,
}

fn default_min_timer_resolution_ms() -> u64 {
    1
}

fn default_max_timer_resolution_ms() -> u64 {
    60_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: None,
            min_timer_resolution_ms: default_min_timer_resolution_ms(),
            max_timer_resolution_ms: default_max_timer_resolution_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Hint for how many OS pages to reserve for the first allocation of
    /// each [`crate::compiler::Arena`] (spec.md §4.1); the arena still
    /// grows on demand, this only sizes its first `mmap`.
    #[serde(default = "default_initial_pages")]
    pub initial_pages: usize,
}

fn default_initial_pages() -> usize {
    4
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig { initial_pages: default_initial_pages() }
    }
}

impl Default for GotsConfig {
    fn default() -> Self {
        GotsConfig { runtime: RuntimeConfig::default(), arena: ArenaConfig::default() }
    }
}

impl GotsConfig {
    /// Load `gots.toml` from `dir` if present, otherwise return defaults.
    pub fn load_from_dir(dir: &Path) -> crate::error::Result<Self> {
        let path = dir.join("gots.toml");
        if !path.exists() {
            return Ok(GotsConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| crate::error::GotsError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = GotsConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.runtime.min_timer_resolution_ms, 1);
        assert!(config.runtime.worker_threads.is_none());
    }

    #[test]
    fn parses_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gots.toml"),
            "[runtime]\nworker_threads = 4\n",
        )
        .unwrap();
        let config = GotsConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.runtime.worker_threads, Some(4));
        assert_eq!(config.runtime.max_timer_resolution_ms, 60_000);
    }
}

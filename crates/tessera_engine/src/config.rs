//! # Engine Configuration
//!
//! Loaded once at startup, from code or from a TOML file:
//!
//! ```toml
//! worker_threads = 4
//! tick_budget_ms = 16
//! detect_write_contention = true
//! input_queue_capacity = 1024
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Engine tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Threads of the pool running execution groups. `None` uses the
    /// global rayon pool.
    pub worker_threads: Option<usize>,
    /// Ticks slower than this are logged and counted as late. 0 disables
    /// the check.
    pub tick_budget_ms: u64,
    /// Count and log write contention between concurrent systems on one
    /// entity.
    pub detect_write_contention: bool,
    /// Bound of the input queue. `None` is unbounded.
    pub input_queue_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            tick_budget_ms: 16,
            detect_write_contention: false,
            input_queue_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] on malformed TOML, unknown keys or invalid
    /// values.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| EngineError::Config(format!("parse engine TOML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("read {}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] for a zero thread count or queue capacity.
    pub fn validate(&self) -> EngineResult<()> {
        if self.worker_threads == Some(0) {
            return Err(EngineError::Config("worker_threads must be at least 1".into()));
        }
        if self.input_queue_capacity == Some(0) {
            return Err(EngineError::Config("input_queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

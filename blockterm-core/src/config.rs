//! Session configuration.
//!
//! Values arrive already resolved (from the host's settings layer or a JSON
//! file); nothing here is persisted back.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SessionError;
use crate::term::TermSize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub columns: u16,
    pub rows: u16,
    /// Lines kept above the visible screen before the oldest are dropped.
    pub scrollback_lines: usize,
    /// Minimum spacing between two scrape notifications.
    pub scrape_interval_ms: u64,
    /// Shell to spawn. `None` picks `$SHELL` (or PowerShell on Windows).
    pub shell: Option<String>,
    pub typeahead: TypeAheadConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeAheadConfig {
    pub enabled: bool,
    /// Quiet period after the last keystroke before unconfirmed predictions are dropped.
    pub debounce_ms: u64,
    /// Upper bound on how long a prediction may stay unconfirmed, however often it is re-armed.
    pub max_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
            scrollback_lines: 5000,
            scrape_interval_ms: 10,
            shell: None,
            typeahead: TypeAheadConfig::default(),
        }
    }
}

impl Default for TypeAheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 1500,
            max_delay_ms: 3000,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn size(&self) -> TermSize {
        TermSize::new(self.columns, self.rows)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_millis(self.scrape_interval_ms)
    }
}

impl TypeAheadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.debounce_ms))
    }
}

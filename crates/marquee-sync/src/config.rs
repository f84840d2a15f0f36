use std::env;
use std::time::Duration;

use crate::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::suggest::SuggestConfig;

/// Library-wide tuning, resolved once from the environment at startup.
/// Components never read the environment themselves; wiring code passes
/// the resolved values down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rows per page requested by default (capped at the server maximum).
    pub page_size: u64,
    /// Quiet period between the last keystroke and a suggestion fetch.
    pub suggest_debounce: Duration,
    /// Minimum query length before a lookup fires.
    pub suggest_min_chars: usize,
    /// Grace period between blur and panel close.
    pub close_grace: Duration,
    /// Cap on suggestions returned by in-memory lookup surfaces.
    pub suggest_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            suggest_debounce: Duration::from_millis(200),
            suggest_min_chars: 1,
            close_grace: Duration::from_millis(120),
            suggest_limit: 8,
        }
    }
}

impl Config {
    /// Load configuration from `MARQUEE_*` environment variables, keeping
    /// the default for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_u64("MARQUEE_PAGE_SIZE") {
            config.page_size = value.clamp(1, MAX_PAGE_SIZE);
        }
        if let Some(value) = env_u64("MARQUEE_SUGGEST_DEBOUNCE_MS") {
            config.suggest_debounce = Duration::from_millis(value);
        }
        if let Some(value) = env_u64("MARQUEE_SUGGEST_MIN_CHARS") {
            config.suggest_min_chars = value as usize;
        }
        if let Some(value) = env_u64("MARQUEE_CLOSE_GRACE_MS") {
            config.close_grace = Duration::from_millis(value);
        }
        if let Some(value) = env_u64("MARQUEE_SUGGEST_LIMIT") {
            config.suggest_limit = value as usize;
        }
        config
    }

    /// The suggester slice of this configuration.
    pub fn suggest(&self) -> SuggestConfig {
        SuggestConfig {
            min_chars: self.suggest_min_chars,
            debounce: self.suggest_debounce,
            close_grace: self.close_grace,
        }
    }
}

fn env_u64(var: &str) -> Option<u64> {
    env::var(var).ok()?.trim().parse().ok()
}

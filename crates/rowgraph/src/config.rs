//! Process runtime configuration.
//!
//! Hosts either embed [`RuntimeConfig`] in their own configuration files or
//! rely on [`RuntimeConfig::global`], which reads the environment once.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

///
/// CONSTANTS
///

/// Default cap on logical entities produced by one fetch when the request
/// does not set its own limit.
pub const DEFAULT_GLOBAL_ROW_LIMIT: u64 = 1_000_000;

/// Environment variable overriding [`DEFAULT_GLOBAL_ROW_LIMIT`].
pub const GLOBAL_ROW_LIMIT_ENV: &str = "ROWGRAPH_QUERY_GLOBAL_LIMIT";

static GLOBAL: OnceLock<RuntimeConfig> = OnceLock::new();

///
/// RuntimeConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Safety cap on logical entities per fetch.
    pub global_row_limit: u64,
}

impl RuntimeConfig {
    /// Build a config from defaults plus environment overrides.
    ///
    /// Unparseable or zero overrides are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(GLOBAL_ROW_LIMIT_ENV) {
            match parse_row_limit(&raw) {
                Some(limit) => config.global_row_limit = limit,
                None => log::warn!(
                    "ignoring {GLOBAL_ROW_LIMIT_ENV}={raw:?}; expected a positive integer"
                ),
            }
        }

        config
    }

    /// Process-wide config, resolved from the environment on first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::from_env)
    }

    #[must_use]
    pub const fn with_global_row_limit(mut self, limit: u64) -> Self {
        self.global_row_limit = limit;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            global_row_limit: DEFAULT_GLOBAL_ROW_LIMIT,
        }
    }
}

fn parse_row_limit(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|limit| *limit > 0)
}

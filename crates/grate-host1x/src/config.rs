//! Runtime configuration.
//!
//! Defaults are usable as-is. [`Host1xConfig::from_env`] layers environment overrides on top:
//!
//! - `GRATE_BACKEND`: `auto` (default) or the name of a backend to require, e.g. `dummy`.
//! - `GRATE_WAIT_TIMEOUT_MS`: default wait timeout; `4294967295` means forever.
//! - `GRATE_DUMMY_DEFERRED`: truthy to make the dummy backend hold submissions until
//!   [`crate::dummy::DummyDevice::run_pending`].

use tracing::warn;

use crate::fence::Timeout;

pub const BACKEND_ENV: &str = "GRATE_BACKEND";
pub const WAIT_TIMEOUT_ENV: &str = "GRATE_WAIT_TIMEOUT_MS";
pub const DUMMY_DEFERRED_ENV: &str = "GRATE_DUMMY_DEFERRED";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    /// First backend whose probe succeeds.
    #[default]
    Auto,
    /// Only the backend with this name.
    Named(String),
}

impl BackendPreference {
    pub fn parse(raw: &str) -> Self {
        let v = raw.trim();
        if v.is_empty() || v.eq_ignore_ascii_case("auto") {
            BackendPreference::Auto
        } else {
            BackendPreference::Named(v.to_ascii_lowercase())
        }
    }

    pub fn allows(&self, backend: &str) -> bool {
        match self {
            BackendPreference::Auto => true,
            BackendPreference::Named(name) => name.eq_ignore_ascii_case(backend),
        }
    }
}

/// When the dummy backend executes submitted streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DummyCompletionMode {
    /// During `submit`.
    #[default]
    Immediate,
    /// When the test calls `run_pending`.
    Deferred,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyConfig {
    pub completion: DummyCompletionMode,
    /// Total syncpoints the device exposes.
    pub syncpoints: u32,
    /// Syncpoints handed to each opened channel.
    pub syncpoints_per_channel: u32,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            completion: DummyCompletionMode::Immediate,
            syncpoints: 32,
            syncpoints_per_channel: 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Host1xConfig {
    pub backend: BackendPreference,
    /// Used by [`crate::client::Client::finish`].
    pub default_timeout: Timeout,
    pub dummy: DummyConfig,
}

impl Host1xConfig {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up by variable name. Unparseable values are logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(BACKEND_ENV) {
            self.backend = BackendPreference::parse(&raw);
        }

        if let Some(raw) = lookup(WAIT_TIMEOUT_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(millis) => self.default_timeout = Timeout::from_raw_millis(millis),
                Err(err) => warn!(var = WAIT_TIMEOUT_ENV, value = %raw, %err, "ignoring invalid timeout"),
            }
        }

        if lookup(DUMMY_DEFERRED_ENV).is_some_and(|raw| truthy(&raw)) {
            self.dummy.completion = DummyCompletionMode::Deferred;
        }

        self
    }
}

fn truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

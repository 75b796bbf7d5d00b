//! Configuration loading from environment variables.

use super::error::ConfigError;
use super::history::ContributorPolicy;
use super::types::Currency;
use std::path::PathBuf;

/// Reconciliation engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to the sled database
    pub db_path: Option<PathBuf>,
    /// Currency applied when a confirmation carries none
    pub default_currency: Currency,
    /// First-time contributor detection
    pub contributor_policy: ContributorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            default_currency: Currency::USD,
            contributor_policy: ContributorPolicy::HistoryScan,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `PLEDGE_DB_PATH`: sled database directory (no default)
    /// - `PLEDGE_DEFAULT_CURRENCY`: ISO currency code (default: USD)
    /// - `PLEDGE_CONTRIBUTOR_POLICY`: `history-scan` or `claim-marker` (default: history-scan)
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("PLEDGE_DB_PATH").ok().map(PathBuf::from);

        let default_currency = match std::env::var("PLEDGE_DEFAULT_CURRENCY") {
            Ok(value) => value.parse().map_err(|e: crate::error::ReconcileError| {
                ConfigError::Invalid("PLEDGE_DEFAULT_CURRENCY", e.to_string())
            })?,
            Err(_) => Currency::USD,
        };

        let contributor_policy = match std::env::var("PLEDGE_CONTRIBUTOR_POLICY") {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::Invalid("PLEDGE_CONTRIBUTOR_POLICY", e))?,
            Err(_) => ContributorPolicy::HistoryScan,
        };

        Ok(Self {
            db_path,
            default_currency,
            contributor_policy,
        })
    }

    /// The database path, failing when none was configured.
    pub fn require_db_path(&self) -> Result<&PathBuf, ConfigError> {
        self.db_path
            .as_ref()
            .ok_or(ConfigError::Missing("PLEDGE_DB_PATH"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 3] = [
        "PLEDGE_DB_PATH",
        "PLEDGE_DEFAULT_CURRENCY",
        "PLEDGE_CONTRIBUTOR_POLICY",
    ];

    /// Sets env vars for a test and restores them on drop
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());
        assert!(matches!(
            config.require_db_path(),
            Err(ConfigError::Missing("PLEDGE_DB_PATH"))
        ));
    }

    #[test]
    fn reads_all_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("PLEDGE_DB_PATH", "/tmp/pledges");
        guard.set("PLEDGE_DEFAULT_CURRENCY", "gbp");
        guard.set("PLEDGE_CONTRIBUTOR_POLICY", "claim-marker");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/pledges")));
        assert_eq!(config.default_currency, Currency::GBP);
        assert_eq!(config.contributor_policy, ContributorPolicy::ClaimMarker);
    }

    #[test]
    fn rejects_unknown_currency() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("PLEDGE_DEFAULT_CURRENCY", "doubloons");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("PLEDGE_DEFAULT_CURRENCY", _))
        ));
    }

    #[test]
    fn rejects_unknown_policy() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("PLEDGE_CONTRIBUTOR_POLICY", "optimistic");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("PLEDGE_CONTRIBUTOR_POLICY", _))
        ));
    }
}

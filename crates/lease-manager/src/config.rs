//! Configuration for the lease manager.
//!
//! The configuration is read once at startup and shared immutably with every
//! admission and release call.

use std::env;
use std::fmt;

use thiserror::Error;

/// Environment variable naming the lease table (namespace for the Kubernetes backend).
pub const ENV_TABLE_NAME: &str = "LEASE_TABLE_NAME";
/// Environment variable holding the partition value of the capacity domain.
pub const ENV_HASH_VALUE: &str = "LEASE_HASH_VALUE";
/// Environment variable naming the partition key attribute.
pub const ENV_HASH_KEY: &str = "LEASE_HASH_KEY";
/// Environment variable naming the sort key attribute.
pub const ENV_RANGE_KEY: &str = "LEASE_RANGE_KEY";
/// Environment variable holding the lease ceiling.
pub const ENV_MAX_CONCURRENT: &str = "MAX_CONCURRENT_LEASES";
/// Environment variable holding the lease time-to-live.
pub const ENV_TTL_SECONDS: &str = "LEASE_TTL_SECONDS";

/// Every variable [`LeaseConfig::from_env`] requires, in reporting order.
pub const REQUIRED_VARS: [&str; 6] = [
    ENV_TABLE_NAME,
    ENV_HASH_VALUE,
    ENV_HASH_KEY,
    ENV_RANGE_KEY,
    ENV_MAX_CONCURRENT,
    ENV_TTL_SECONDS,
];

/// Errors raised while building a [`LeaseConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {0:?}")]
    MissingVars(Vec<&'static str>),

    #[error("{var} must be an integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be a positive integer")]
    NotPositive { var: &'static str },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// A namespace within which one concurrency ceiling applies.
///
/// Mirrors the store's partition scheme: every lease of the domain lives under
/// `hash_key = hash_value` and is discriminated by its `range_key` (the lease id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapacityDomain {
    /// Partition key attribute name.
    pub hash_key: String,
    /// Partition value identifying this domain.
    pub hash_value: String,
    /// Sort key attribute name.
    pub range_key: String,
}

impl CapacityDomain {
    pub fn new(
        hash_key: impl Into<String>,
        hash_value: impl Into<String>,
        range_key: impl Into<String>,
    ) -> Self {
        Self {
            hash_key: hash_key.into(),
            hash_value: hash_value.into(),
            range_key: range_key.into(),
        }
    }
}

impl fmt::Display for CapacityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.hash_key, self.hash_value)
    }
}

/// Immutable lease manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Lease table name.
    pub table_name: String,
    /// Capacity domain the ceiling applies to.
    pub domain: CapacityDomain,
    /// Maximum number of simultaneously live leases.
    pub max_concurrent: u32,
    /// Lease time-to-live in seconds.
    pub ttl_seconds: i64,
}

impl LeaseConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Presence is checked for all required variables before any value is
    /// parsed, so a single error reports every missing name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<&'static str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|var| lookup(var).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let text = |var: &'static str| -> Result<String, ConfigError> {
            let value = lookup(var).unwrap_or_default();
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { var });
            }
            Ok(value)
        };

        let max_concurrent = parse_positive(ENV_MAX_CONCURRENT, &text(ENV_MAX_CONCURRENT)?)?;
        let ttl_seconds = parse_positive(ENV_TTL_SECONDS, &text(ENV_TTL_SECONDS)?)?;

        Ok(Self {
            table_name: text(ENV_TABLE_NAME)?,
            domain: CapacityDomain {
                hash_key: text(ENV_HASH_KEY)?,
                hash_value: text(ENV_HASH_VALUE)?,
                range_key: text(ENV_RANGE_KEY)?,
            },
            max_concurrent: u32::try_from(max_concurrent)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: ENV_MAX_CONCURRENT,
                    value: max_concurrent.to_string(),
                })?,
            ttl_seconds,
        })
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<i64, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        })?;
    if value <= 0 {
        return Err(ConfigError::NotPositive { var });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            (ENV_TABLE_NAME, "concurrency-leases-example".to_string()),
            (ENV_HASH_VALUE, "CONCURRENCY_LEASES".to_string()),
            (ENV_HASH_KEY, "PK".to_string()),
            (ENV_RANGE_KEY, "SK".to_string()),
            (ENV_MAX_CONCURRENT, "1".to_string()),
            (ENV_TTL_SECONDS, "60".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<LeaseConfig, ConfigError> {
        LeaseConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_parses_complete_environment() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.table_name, "concurrency-leases-example");
        assert_eq!(config.domain, CapacityDomain::new("PK", "CONCURRENCY_LEASES", "SK"));
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.ttl_seconds, 60);
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let mut env = base_env();
        env.remove(ENV_RANGE_KEY);
        env.remove(ENV_TTL_SECONDS);

        let err = load(&env).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingVars(vec![ENV_RANGE_KEY, ENV_TTL_SECONDS])
        );
        assert!(err
            .to_string()
            .contains("Missing required environment variables"));
    }

    #[test]
    fn test_rejects_non_numeric_ceiling() {
        let mut env = base_env();
        env.insert(ENV_MAX_CONCURRENT, "many".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidNumber { var: ENV_MAX_CONCURRENT, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let mut env = base_env();
        env.insert(ENV_TTL_SECONDS, "0".to_string());
        assert_eq!(
            load(&env),
            Err(ConfigError::NotPositive { var: ENV_TTL_SECONDS })
        );
    }

    #[test]
    fn test_rejects_blank_partition_value() {
        let mut env = base_env();
        env.insert(ENV_HASH_VALUE, "  ".to_string());
        assert_eq!(load(&env), Err(ConfigError::Empty { var: ENV_HASH_VALUE }));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            for (key, value) in base_env() {
                env::set_var(key, value);
            }
            env::set_var(ENV_MAX_CONCURRENT, "3");
        }

        let config = LeaseConfig::from_env().unwrap();
        assert_eq!(config.max_concurrent, 3);

        unsafe {
            for key in REQUIRED_VARS {
                env::remove_var(key);
            }
        }
    }
}

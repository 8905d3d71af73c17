//! Configuration for choosing and building a locker backend
//!
//! Values come from an optional file plus `GLOBALLOCK_*` environment
//! variables, which take precedence over the file.

use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment};
use globallock_common::{GlobalLockError, Result};
use globallock_store::{DEFAULT_KEY_PREFIX, RedisLeaseStore};
use tracing::info;

use crate::leased::{DEFAULT_LEASE_EXPIRY, LeasedLocker};
use crate::locker::Locker;
use crate::memory::MemoryLocker;

pub const SERVICE_TYPE_PROPERTY: &str = "service_type";
pub const SERVICE_CONN_STR_PROPERTY: &str = "service_conn_str";
pub const LEASE_EXPIRY_MS_PROPERTY: &str = "lease_expiry_ms";
pub const KEY_PREFIX_PROPERTY: &str = "key_prefix";

pub const DEFAULT_SERVICE_CONN_STR: &str = "redis://127.0.0.1:6379/0";

const ENV_PREFIX: &str = "GLOBALLOCK";

/// Locker backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceType {
    /// Per-process mutexes
    #[default]
    Memory,
    /// Leases in a shared Redis
    Redis,
}

impl std::str::FromStr for ServiceType {
    type Err = GlobalLockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(GlobalLockError::Config(format!(
                "unknown service type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalLockConfig {
    pub service_type: ServiceType,
    pub service_conn_str: String,
    pub lease_expiry: Duration,
    pub key_prefix: String,
}

impl Default for GlobalLockConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::Memory,
            service_conn_str: DEFAULT_SERVICE_CONN_STR.to_string(),
            lease_expiry: DEFAULT_LEASE_EXPIRY,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl GlobalLockConfig {
    /// Load from `path` (if given and present) overlaid with the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX).try_parsing(true)
    }

    fn load_with_env(path: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(env)
            .build()
            .map_err(|e| GlobalLockError::Config(e.to_string()))?;

        Self::from_config(&settings)
    }

    /// Read the known keys from an already built [`Config`], with defaults
    pub fn from_config(settings: &Config) -> Result<Self> {
        let service_type = settings
            .get_string(SERVICE_TYPE_PROPERTY)
            .unwrap_or_default()
            .parse()?;

        let service_conn_str = settings
            .get_string(SERVICE_CONN_STR_PROPERTY)
            .unwrap_or(DEFAULT_SERVICE_CONN_STR.to_string());

        let lease_expiry_ms = settings
            .get_int(LEASE_EXPIRY_MS_PROPERTY)
            .unwrap_or(DEFAULT_LEASE_EXPIRY.as_millis() as i64);
        if lease_expiry_ms < 0 {
            return Err(GlobalLockError::Config(format!(
                "{LEASE_EXPIRY_MS_PROPERTY} must not be negative: {lease_expiry_ms}"
            )));
        }

        let key_prefix = settings
            .get_string(KEY_PREFIX_PROPERTY)
            .unwrap_or(DEFAULT_KEY_PREFIX.to_string());

        let config = Self {
            service_type,
            service_conn_str,
            lease_expiry: Duration::from_millis(lease_expiry_ms as u64),
            key_prefix,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_expiry.is_zero() {
            return Err(GlobalLockError::Config(format!(
                "{LEASE_EXPIRY_MS_PROPERTY} must be greater than zero"
            )));
        }
        if self.service_type == ServiceType::Redis && self.service_conn_str.trim().is_empty() {
            return Err(GlobalLockError::Config(format!(
                "{SERVICE_CONN_STR_PROPERTY} is required for the redis backend"
            )));
        }
        Ok(())
    }
}

/// Build the locker described by `config`.
///
/// The redis backend connects eagerly so a bad address fails here rather
/// than on the first lock.
pub async fn new_locker(config: &GlobalLockConfig) -> Result<Arc<dyn Locker>> {
    config.validate()?;

    let locker: Arc<dyn Locker> = match config.service_type {
        ServiceType::Memory => Arc::new(MemoryLocker::new()),
        ServiceType::Redis => {
            let store =
                RedisLeaseStore::connect(&config.service_conn_str, config.key_prefix.clone())
                    .await?;
            Arc::new(LeasedLocker::with_expiry(
                Arc::new(store),
                config.lease_expiry,
            ))
        }
    };

    info!(
        backend = locker.backend(),
        service_type = %config.service_type,
        lease_expiry_ms = config.lease_expiry.as_millis() as u64,
        "Locker created"
    );
    Ok(locker)
}

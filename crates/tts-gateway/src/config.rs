//! Gateway configuration.
//!
//! Every section has a `Default`; [`GatewayConfig::from_env`] overlays `GATEWAY_*`
//! environment variables. Values are fixed for the lifetime of the components built
//! from them.

use std::time::Duration;

use crate::backend::BackendConfig;
use crate::permit::LimiterConfig;
use crate::queue::QueueConfig;
use crate::transport::ServerConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent must be greater than zero")]
    ZeroConcurrency,
    #[error("queue workers must be greater than zero")]
    ZeroWorkers,
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub limiter: LimiterConfig,
    /// `None` runs relays directly on the request task, skipping the queue tier.
    pub queue: Option<QueueConfig>,
    pub backend: BackendConfig,
    pub server: ServerConfig,
    /// Relay raw backend diagnostic text to clients.
    pub expose_backend_errors: bool,
}

impl GatewayConfig {
    /// Defaults overlaid with `GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEWAY_MAX_CONCURRENT") {
            config.limiter.max_concurrent = parse(&v, "GATEWAY_MAX_CONCURRENT")?;
            if config.limiter.max_concurrent == 0 {
                return Err(ConfigError::ZeroConcurrency);
            }
        }
        if let Some(v) = lookup("GATEWAY_ACQUIRE_TIMEOUT_MS") {
            // Negative means "wait for the caller", zero means "never wait".
            let ms: i64 = parse(&v, "GATEWAY_ACQUIRE_TIMEOUT_MS")?;
            config.limiter.acquire_timeout = u64::try_from(ms).ok().map(Duration::from_millis);
        }

        let workers = lookup("GATEWAY_QUEUE_WORKERS")
            .map(|v| parse::<usize>(&v, "GATEWAY_QUEUE_WORKERS"))
            .transpose()?;
        let capacity = lookup("GATEWAY_QUEUE_CAPACITY")
            .map(|v| parse::<usize>(&v, "GATEWAY_QUEUE_CAPACITY"))
            .transpose()?;
        match (workers, capacity) {
            (Some(0), _) => config.queue = None,
            (None, None) => {}
            (workers, capacity) => {
                let defaults = QueueConfig::default();
                config.queue = Some(QueueConfig {
                    workers: workers.unwrap_or(defaults.workers),
                    capacity: capacity.unwrap_or(defaults.capacity),
                });
            }
        }

        if let Some(v) = lookup("GATEWAY_BACKEND_URL") {
            if v.trim().is_empty() {
                return Err(ConfigError::invalid("GATEWAY_BACKEND_URL", v, "must not be empty"));
            }
            config.backend.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("GATEWAY_BACKEND_TIMEOUT_MS") {
            let ms: u64 = parse(&v, "GATEWAY_BACKEND_TIMEOUT_MS")?;
            config.backend.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(v) = lookup("GATEWAY_HOST") {
            config.server.host = v;
        }
        if let Some(v) = lookup("GATEWAY_PORT") {
            config.server.port = parse(&v, "GATEWAY_PORT")?;
        }
        if let Some(v) = lookup("GATEWAY_AWAIT_EXPLICIT_SHUTDOWN") {
            config.server.await_explicit_shutdown =
                parse_bool(&v, "GATEWAY_AWAIT_EXPLICIT_SHUTDOWN")?;
        }
        if let Some(v) = lookup("GATEWAY_DRAIN_TIMEOUT_MS") {
            let ms: u64 = parse(&v, "GATEWAY_DRAIN_TIMEOUT_MS")?;
            config.server.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("GATEWAY_EXPOSE_BACKEND_ERRORS") {
            config.expose_backend_errors = parse_bool(&v, "GATEWAY_EXPOSE_BACKEND_ERRORS")?;
        }

        Ok(config)
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.limiter, LimiterConfig::default());
        assert!(config.queue.is_none());
        assert!(!config.expose_backend_errors);
    }

    #[test]
    fn overlays_env_values() {
        let config = from_pairs(&[
            ("GATEWAY_MAX_CONCURRENT", "8"),
            ("GATEWAY_ACQUIRE_TIMEOUT_MS", "250"),
            ("GATEWAY_QUEUE_WORKERS", "2"),
            ("GATEWAY_QUEUE_CAPACITY", "16"),
            ("GATEWAY_BACKEND_URL", "http://backend:8080/"),
            ("GATEWAY_PORT", "9000"),
            ("GATEWAY_EXPOSE_BACKEND_ERRORS", "true"),
        ])
        .unwrap();

        assert_eq!(config.limiter.max_concurrent, 8);
        assert_eq!(
            config.limiter.acquire_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            config.queue,
            Some(QueueConfig {
                workers: 2,
                capacity: 16
            })
        );
        assert_eq!(config.backend.base_url, "http://backend:8080");
        assert_eq!(config.server.port, 9000);
        assert!(config.expose_backend_errors);
    }

    #[test]
    fn server_shutdown_settings() {
        let config = from_pairs(&[
            ("GATEWAY_AWAIT_EXPLICIT_SHUTDOWN", "yes"),
            ("GATEWAY_DRAIN_TIMEOUT_MS", "1500"),
            ("GATEWAY_BACKEND_TIMEOUT_MS", "0"),
        ])
        .unwrap();
        assert!(config.server.await_explicit_shutdown);
        assert_eq!(config.server.drain_timeout, Duration::from_millis(1500));
        assert_eq!(config.backend.timeout, None);
    }

    #[test]
    fn acquire_timeout_policies() {
        let wait = from_pairs(&[("GATEWAY_ACQUIRE_TIMEOUT_MS", "-1")]).unwrap();
        assert_eq!(wait.limiter.acquire_timeout, None);

        let no_wait = from_pairs(&[("GATEWAY_ACQUIRE_TIMEOUT_MS", "0")]).unwrap();
        assert_eq!(no_wait.limiter.acquire_timeout, Some(Duration::ZERO));
    }

    #[test]
    fn zero_concurrency_fails_fast() {
        let err = from_pairs(&[("GATEWAY_MAX_CONCURRENT", "0")]).unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrency);
    }

    #[test]
    fn garbage_values_are_reported() {
        let err = from_pairs(&[("GATEWAY_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "GATEWAY_PORT"));
    }

    #[test]
    fn zero_workers_disables_queue() {
        let config = from_pairs(&[
            ("GATEWAY_QUEUE_WORKERS", "0"),
            ("GATEWAY_QUEUE_CAPACITY", "4"),
        ])
        .unwrap();
        assert!(config.queue.is_none());
    }
}

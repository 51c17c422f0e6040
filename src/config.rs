//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Where and how to reach the marketplace backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, without trailing slash, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Per-request timeout for lookups and registration.
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Wizard behaviour knobs.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Upper bound on the worker's service-city selection.
    pub max_service_cities: usize,
    /// Subscription tier attached to every worker registration.
    pub worker_subscription: String,
    /// Sessions without activity for this long are discarded.
    pub session_idle_timeout: Duration,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            max_service_cities: 3,
            worker_subscription: "BASIC".to_string(),
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// HTTP listener settings for the signup API.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origin of the browser UI allowed by CORS. `None` allows any origin.
    pub allowed_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            allowed_origin: None,
        }
    }
}

/// Everything the binary needs at startup.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub wizard: WizardConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Read configuration from `SIGNUP_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let base_url = lookup("SIGNUP_BACKEND_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.backend.base_url);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "SIGNUP_BACKEND_URL".into(),
                message: format!("expected an http(s) URL, got {base_url:?}"),
            });
        }

        let request_timeout = match lookup("SIGNUP_BACKEND_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("SIGNUP_BACKEND_TIMEOUT_SECS", &raw)?),
            None => defaults.backend.request_timeout,
        };

        let port = match lookup("SIGNUP_PORT") {
            Some(raw) => parse_number("SIGNUP_PORT", &raw)?,
            None => defaults.server.port,
        };

        let max_service_cities = match lookup("SIGNUP_MAX_SERVICE_CITIES") {
            Some(raw) => parse_number("SIGNUP_MAX_SERVICE_CITIES", &raw)?,
            None => defaults.wizard.max_service_cities,
        };
        if max_service_cities == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIGNUP_MAX_SERVICE_CITIES".into(),
                message: "must be at least 1".into(),
            });
        }

        let worker_subscription = lookup("SIGNUP_WORKER_SUBSCRIPTION")
            .filter(|tier| !tier.trim().is_empty())
            .unwrap_or(defaults.wizard.worker_subscription);

        let session_idle_timeout = match lookup("SIGNUP_SESSION_IDLE_SECS") {
            Some(raw) => Duration::from_secs(parse_number("SIGNUP_SESSION_IDLE_SECS", &raw)?),
            None => defaults.wizard.session_idle_timeout,
        };
        if session_idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "SIGNUP_SESSION_IDLE_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        let allowed_origin = lookup("SIGNUP_ALLOWED_ORIGIN").filter(|o| !o.trim().is_empty());

        Ok(Self {
            backend: BackendConfig {
                base_url,
                request_timeout,
            },
            wizard: WizardConfig {
                max_service_cities,
                worker_subscription,
                session_idle_timeout,
            },
            server: ServerConfig {
                port,
                allowed_origin,
            },
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.backend.base_url, "http://localhost:8080");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(10));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.wizard.max_service_cities, 3);
        assert_eq!(config.wizard.worker_subscription, "BASIC");
        assert_eq!(config.wizard.session_idle_timeout, Duration::from_secs(3600));
        assert!(config.server.allowed_origin.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SIGNUP_BACKEND_URL", "https://api.example.com/"),
            ("SIGNUP_BACKEND_TIMEOUT_SECS", "3"),
            ("SIGNUP_PORT", "8081"),
            ("SIGNUP_WORKER_SUBSCRIPTION", "PREMIUM"),
            ("SIGNUP_SESSION_IDLE_SECS", "900"),
            ("SIGNUP_ALLOWED_ORIGIN", "https://app.example.com"),
        ]))
        .unwrap();
        assert_eq!(config.backend.base_url, "https://api.example.com");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(3));
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.wizard.worker_subscription, "PREMIUM");
        assert_eq!(config.wizard.session_idle_timeout, Duration::from_secs(900));
        assert_eq!(
            config.server.allowed_origin.as_deref(),
            Some("https://app.example.com")
        );
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let err = AppConfig::from_lookup(lookup_from(&[("SIGNUP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SIGNUP_PORT"));

        let err = AppConfig::from_lookup(lookup_from(&[("SIGNUP_BACKEND_URL", "ftp://x")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIGNUP_BACKEND_URL"));

        let err = AppConfig::from_lookup(lookup_from(&[("SIGNUP_MAX_SERVICE_CITIES", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));

        let err = AppConfig::from_lookup(lookup_from(&[("SIGNUP_SESSION_IDLE_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIGNUP_SESSION_IDLE_SECS"));
    }
}

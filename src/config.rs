use std::time::Duration;
use tracing::warn;

const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
const DEFAULT_MEDIA_LIMIT: usize = 5 * 1024 * 1024;
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Process-wide settings, resolved once at startup and injected into each
/// component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit: usize,
    pub gateway: GatewayConfig,
    pub activity: ActivityConfig,
    pub media: MediaConfig,
    pub http: HttpConfig,
    pub storefront_url: String,
    pub redis_url: Option<String>,
    pub idempotency_ttl_secs: u64,
    pub openapi_key: Option<String>,
    pub metrics_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub api_token: Option<String>,
    pub authorized_emails: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MEDIA_LIMIT,
            allowed_types: vec!["jpg".into(), "jpeg".into(), "png".into()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let gateway = GatewayConfig {
            api_token: get("INGEST_API_TOKEN"),
            authorized_emails: get("INGEST_AUTHORIZED_EMAILS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        };
        if gateway.api_token.is_none() && gateway.authorized_emails.is_empty() {
            warn!(
                target = "catalog.config",
                "neither INGEST_API_TOKEN nor INGEST_AUTHORIZED_EMAILS is set; every request will be rejected"
            );
        }

        let activity = ActivityConfig {
            enabled: get("ACTIVITY_LOG_ENABLED")
                .map(|value| parse_bool(&value))
                .unwrap_or(true),
            capacity: get("ACTIVITY_LOG_CAPACITY")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_LOG_CAPACITY),
        };

        let media = MediaConfig {
            max_bytes: get("MEDIA_MAX_BYTES")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MEDIA_LIMIT),
            allowed_types: get("MEDIA_ALLOWED_TYPES")
                .map(|raw| {
                    split_list(&raw)
                        .into_iter()
                        .map(|ext| ext.trim_start_matches('.').to_lowercase())
                        .collect()
                })
                .unwrap_or_else(|| MediaConfig::default().allowed_types),
        };

        let http = HttpConfig {
            timeout: get("HTTP_TIMEOUT_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(HttpConfig::default().timeout),
            connect_timeout: get("HTTP_CONNECT_TIMEOUT_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(HttpConfig::default().connect_timeout),
        };

        let port = get("PORT")
            .and_then(|value| value.parse().ok())
            .unwrap_or(8000);

        Self {
            port,
            body_limit: get("REQUEST_MAX_BYTES")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_BODY_LIMIT),
            gateway,
            activity,
            media,
            http,
            storefront_url: get("STOREFRONT_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            redis_url: get("REDIS_URL"),
            idempotency_ttl_secs: get("IDEMPOTENCY_TTL_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(3600),
            openapi_key: get("OPENAPI_KEY"),
            metrics_key: get("METRICS_KEY"),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.body_limit, DEFAULT_BODY_LIMIT);
        assert!(cfg.gateway.api_token.is_none());
        assert!(cfg.gateway.authorized_emails.is_empty());
        assert!(cfg.activity.enabled);
        assert_eq!(cfg.activity.capacity, 1000);
        assert_eq!(cfg.media.allowed_types, vec!["jpg", "jpeg", "png"]);
        assert_eq!(cfg.storefront_url, "http://localhost:8000");
    }

    #[test]
    fn parses_lists_and_flags() {
        let cfg = config_from(&[
            ("INGEST_API_TOKEN", " s3cret "),
            ("INGEST_AUTHORIZED_EMAILS", "a@shop.test, b@shop.test ,,"),
            ("ACTIVITY_LOG_ENABLED", "no"),
            ("MEDIA_ALLOWED_TYPES", ".PNG,webp"),
            ("STOREFRONT_URL", "https://shop.test/"),
            ("ACTIVITY_LOG_CAPACITY", "0"),
        ]);
        assert_eq!(cfg.gateway.api_token.as_deref(), Some("s3cret"));
        assert_eq!(
            cfg.gateway.authorized_emails,
            vec!["a@shop.test".to_string(), "b@shop.test".to_string()]
        );
        assert!(!cfg.activity.enabled);
        assert_eq!(cfg.activity.capacity, DEFAULT_LOG_CAPACITY);
        assert_eq!(cfg.media.allowed_types, vec!["png", "webp"]);
        assert_eq!(cfg.storefront_url, "https://shop.test");
    }
}

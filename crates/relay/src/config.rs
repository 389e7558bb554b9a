// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own sizing variables in db/pool.rs.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEV_JWT_SECRET: &str = "cowatch_local_development_jwt_secret_must_be_32_chars";

const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EVENT_BUS_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHAT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `cowatch_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// PostgreSQL connection string. In-memory registries are used when unset.
    pub database_url: Option<String>,
    /// HS256 secret for locally validated identity tokens.
    pub jwt_secret: String,
    /// Base URL of the identity service. When set, tokens are resolved remotely.
    pub identity_url: Option<String>,
    pub identity_api_key: Option<String>,
    pub identity_timeout: Duration,
    /// Base URL of the event bus HTTP bridge. Events are only logged when unset.
    pub event_bus_url: Option<String>,
    pub event_bus_timeout: Duration,
    /// Time allowed between socket open and a successful `startup`.
    pub auth_timeout: Duration,
    /// Number of chat messages replayed on connect.
    pub chat_history_limit: i64,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COWATCH_RELAY_HOST` | `0.0.0.0` |
    /// | `COWATCH_RELAY_PORT` | `8080` |
    /// | `COWATCH_RELAY_LOG_FILTER` | `info` |
    /// | `COWATCH_RELAY_LOG_FORMAT` | `text` |
    /// | `COWATCH_RELAY_DATABASE_URL` | *(none)* |
    /// | `COWATCH_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `COWATCH_RELAY_IDENTITY_URL` | *(none)* |
    /// | `COWATCH_RELAY_IDENTITY_API_KEY` | *(none)* |
    /// | `COWATCH_RELAY_IDENTITY_TIMEOUT_MS` | `5000` |
    /// | `COWATCH_RELAY_EVENT_BUS_URL` | *(none)* |
    /// | `COWATCH_RELAY_EVENT_BUS_TIMEOUT_MS` | `2000` |
    /// | `COWATCH_RELAY_AUTH_TIMEOUT_MS` | `10000` |
    /// | `COWATCH_RELAY_CHAT_HISTORY_LIMIT` | `100` |
    /// | `COWATCH_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COWATCH_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("COWATCH_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter = env("COWATCH_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("COWATCH_RELAY_LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let jwt_secret = env("COWATCH_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let millis = |key: &str, default: u64| {
            Duration::from_millis(
                env(key).ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(default),
            )
        };

        let chat_history_limit = env("COWATCH_RELAY_CHAT_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_CHAT_HISTORY_LIMIT);

        Self {
            listen_addr,
            log_filter,
            log_format,
            database_url: non_empty(env("COWATCH_RELAY_DATABASE_URL").ok()),
            jwt_secret,
            identity_url: non_empty(env("COWATCH_RELAY_IDENTITY_URL").ok()),
            identity_api_key: non_empty(env("COWATCH_RELAY_IDENTITY_API_KEY").ok()),
            identity_timeout: millis("COWATCH_RELAY_IDENTITY_TIMEOUT_MS", DEFAULT_IDENTITY_TIMEOUT_MS),
            event_bus_url: non_empty(env("COWATCH_RELAY_EVENT_BUS_URL").ok()),
            event_bus_timeout: millis(
                "COWATCH_RELAY_EVENT_BUS_TIMEOUT_MS",
                DEFAULT_EVENT_BUS_TIMEOUT_MS,
            ),
            auth_timeout: millis("COWATCH_RELAY_AUTH_TIMEOUT_MS", DEFAULT_AUTH_TIMEOUT_MS),
            chat_history_limit,
            cors_origins: non_empty(env("COWATCH_RELAY_CORS_ORIGINS").ok()),
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.database_url.is_none());
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.identity_url.is_none());
        assert!(cfg.identity_api_key.is_none());
        assert_eq!(cfg.identity_timeout, Duration::from_secs(5));
        assert!(cfg.event_bus_url.is_none());
        assert_eq!(cfg.event_bus_timeout, Duration::from_secs(2));
        assert_eq!(cfg.auth_timeout, Duration::from_secs(10));
        assert_eq!(cfg.chat_history_limit, 100);
        assert!(cfg.cors_origins.is_none());
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_HOST", "127.0.0.1");
        m.insert("COWATCH_RELAY_PORT", "3000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn json_log_format_is_case_insensitive() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_LOG_FORMAT", "JSON");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn identity_service_settings() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_IDENTITY_URL", "https://users.internal/sockets-api/v1");
        m.insert("COWATCH_RELAY_IDENTITY_API_KEY", "k3y");
        m.insert("COWATCH_RELAY_IDENTITY_TIMEOUT_MS", "1500");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.identity_url.as_deref(), Some("https://users.internal/sockets-api/v1"));
        assert_eq!(cfg.identity_api_key.as_deref(), Some("k3y"));
        assert_eq!(cfg.identity_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn blank_urls_are_treated_as_unset() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_DATABASE_URL", "  ");
        m.insert("COWATCH_RELAY_EVENT_BUS_URL", "");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(cfg.database_url.is_none());
        assert!(cfg.event_bus_url.is_none());
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
    }

    #[test]
    fn non_positive_chat_history_limit_uses_default() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_CHAT_HISTORY_LIMIT", "0");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.chat_history_limit, 100);

        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_CHAT_HISTORY_LIMIT", "25");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.chat_history_limit, 25);
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("COWATCH_RELAY_DATABASE_URL", "postgres://u:p@host/db?sslmode=require");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/db?sslmode=require"));
    }
}

// Gateway configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The composition root (main.rs) reads this once and hands the
// pieces to the services it constructs.

use std::net::SocketAddr;
use std::time::Duration;

/// Core gateway configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HMAC secret for validating identity assertions from the auth backend.
    pub auth_secret: String,
    /// Explicit Origin allow-list for WebSocket handshakes. Empty means any
    /// non-empty Origin passes (permissive default, audit before production).
    pub allowed_origins: Vec<String>,
    /// Sliding-window rate limit: messages allowed per window per user.
    pub rate_limit_max_messages: u32,
    /// Sliding-window rate limit: window length.
    pub rate_limit_window: Duration,
    /// Log filter directive (e.g. `info`, `crewline_gateway=debug`).
    pub log_filter: String,
}

const DEV_AUTH_SECRET: &str = "crewline_local_development_auth_secret_32_chars_min";

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CREWLINE_GATEWAY_HOST` | `0.0.0.0` |
    /// | `CREWLINE_GATEWAY_PORT` | `8080` |
    /// | `CREWLINE_GATEWAY_AUTH_SECRET` | dev-only placeholder |
    /// | `CREWLINE_GATEWAY_ALLOWED_ORIGINS` | *(none — any origin passes)* |
    /// | `CREWLINE_GATEWAY_RATE_LIMIT_MAX` | `30` |
    /// | `CREWLINE_GATEWAY_RATE_LIMIT_WINDOW_SECS` | `60` |
    /// | `CREWLINE_GATEWAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CREWLINE_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("CREWLINE_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let auth_secret =
            env("CREWLINE_GATEWAY_AUTH_SECRET").unwrap_or_else(|_| DEV_AUTH_SECRET.into());

        let allowed_origins = env("CREWLINE_GATEWAY_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default();

        let rate_limit_max_messages = env("CREWLINE_GATEWAY_RATE_LIMIT_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let rate_limit_window_secs: u64 = env("CREWLINE_GATEWAY_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let log_filter = env("CREWLINE_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            auth_secret,
            allowed_origins,
            rate_limit_max_messages,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            log_filter,
        }
    }

    /// Returns true when using the development-only auth secret.
    pub fn is_dev_auth_secret(&self) -> bool {
        self.auth_secret == DEV_AUTH_SECRET
    }
}

fn parse_origins(comma_separated: &str) -> Vec<String> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

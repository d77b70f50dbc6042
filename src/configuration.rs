use std::time::Duration;

use config::{ConfigError, Environment, File};

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Session store connection settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: usize,
    /// Bound applied to pool checkout and to every command
    pub timeout_ms: u64,
}

impl RedisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which token window the session record lives for
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionTtlPolicy {
    Refresh,
    Access,
}

/// JWT authentication settings
///
/// All lifetimes are in seconds.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    /// Base64-encoded HMAC secret for access tokens
    pub access_secret: String,
    /// Base64-encoded HMAC secret for refresh tokens, distinct from the access one
    pub refresh_secret: String,
    pub access_token_expiry: u64,
    pub refresh_token_expiry: u64,
    pub session_prefix: String,
    pub session_ttl_policy: SessionTtlPolicy,
}

impl JwtSettings {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_expiry)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expiry)
    }

    /// TTL applied to the cached session record
    pub fn session_ttl(&self) -> Duration {
        match self.session_ttl_policy {
            SessionTtlPolicy::Refresh => self.refresh_ttl(),
            SessionTtlPolicy::Access => self.access_ttl(),
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct TelemetrySettings {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub json: bool,
}

/// Load settings from defaults, an optional `configuration` file, then
/// `APP__<SECTION>__<KEY>` environment variables.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8080)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("redis.pool_size", 16)?
        .set_default("redis.timeout_ms", 500)?
        .set_default("jwt.access_secret", "bXklMjBuYW1lJTIwaXMlMjBnb29kdGltcA==")?
        .set_default(
            "jwt.refresh_secret",
            "JXU3MjMxJXU0RjYwJXU1NTRBJXU1OTBGJXU2OEE2JXU2NUNC",
        )?
        .set_default("jwt.access_token_expiry", 3000)?
        .set_default("jwt.refresh_token_expiry", 604800)?
        .set_default("jwt.session_prefix", "session:refresh:")?
        .set_default("jwt.session_ttl_policy", "refresh")?
        .set_default("telemetry.level", "info")?
        .set_default("telemetry.json", true)?
        .add_source(File::with_name("configuration").required(false))
        .add_source(Environment::with_prefix("APP").prefix_separator("__").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load() {
        let settings = get_configuration().expect("Failed to load defaults");

        assert_eq!(settings.jwt.access_token_expiry, 3000);
        assert_eq!(settings.jwt.refresh_token_expiry, 604800);
        assert_ne!(settings.jwt.access_secret, settings.jwt.refresh_secret);
        assert_eq!(settings.jwt.session_ttl_policy, SessionTtlPolicy::Refresh);
        assert_eq!(settings.redis.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_session_ttl_follows_policy() {
        let mut jwt = get_configuration().expect("Failed to load defaults").jwt;
        assert_eq!(jwt.session_ttl(), Duration::from_secs(604800));

        jwt.session_ttl_policy = SessionTtlPolicy::Access;
        assert_eq!(jwt.session_ttl(), Duration::from_secs(3000));
    }
}

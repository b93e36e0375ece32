//! Environment configuration
//!
//! All knobs the core consumes come from the environment; `.env` files are
//! honored via dotenvy in `main`.

use std::env;

/// Environment variable names
const ENV_DB_HOST: &str = "DB_HOST";
const ENV_DB_PORT: &str = "DB_PORT";
const ENV_DB_USER: &str = "DB_USER";
const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
const ENV_DB_NAME: &str = "DB_NAME";
const ENV_DB_STATEMENT_TIMEOUT: &str = "DB_STATEMENT_TIMEOUT";
const ENV_REDIS_HOST: &str = "REDIS_HOST";
const ENV_REDIS_PORT: &str = "REDIS_PORT";
const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
const ENV_API_PORT: &str = "API_PORT";

/// Default statement timeout in milliseconds
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 120_000;

/// Maximum Postgres pool size
pub const DB_MAX_CONNECTIONS: u32 = 20;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub statement_timeout_ms: u64,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables with local defaults.
    pub fn from_env() -> Self {
        Self {
            db_host: env::var(ENV_DB_HOST).unwrap_or_else(|_| "localhost".into()),
            db_port: env::var(ENV_DB_PORT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            db_user: env::var(ENV_DB_USER).unwrap_or_else(|_| "postgres".into()),
            db_password: env::var(ENV_DB_PASSWORD).unwrap_or_else(|_| "postgres".into()),
            db_name: env::var(ENV_DB_NAME).unwrap_or_else(|_| "stablewatch".into()),
            statement_timeout_ms: env::var(ENV_DB_STATEMENT_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_MS),
            redis_host: env::var(ENV_REDIS_HOST).unwrap_or_else(|_| "localhost".into()),
            redis_port: env::var(ENV_REDIS_PORT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6379),
            redis_password: env::var(ENV_REDIS_PASSWORD).ok().filter(|s| !s.is_empty()),
            api_port: env::var(ENV_API_PORT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3000),
        }
    }

    /// Postgres connection URL with the statement timeout applied.
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?options=-c%20statement_timeout%3D{}",
            self.db_user,
            self.db_password,
            self.db_host,
            self.db_port,
            self.db_name,
            self.statement_timeout_ms
        )
    }

    /// Redis connection URL shared by the queue and the rate limiter.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/",
                password, self.redis_host, self.redis_port
            ),
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_carries_statement_timeout() {
        let config = AppConfig {
            db_host: "db".into(),
            db_port: 5432,
            db_user: "app".into(),
            db_password: "secret".into(),
            db_name: "stablewatch".into(),
            statement_timeout_ms: 120_000,
            redis_host: "redis".into(),
            redis_port: 6379,
            redis_password: None,
            api_port: 3000,
        };
        let url = config.database_url();
        assert!(url.starts_with("postgres://app:secret@db:5432/stablewatch"));
        assert!(url.contains("statement_timeout%3D120000"));
    }

    #[test]
    fn test_redis_url_with_and_without_password() {
        let mut config = AppConfig {
            db_host: "db".into(),
            db_port: 5432,
            db_user: "app".into(),
            db_password: "secret".into(),
            db_name: "stablewatch".into(),
            statement_timeout_ms: 120_000,
            redis_host: "redis".into(),
            redis_port: 6379,
            redis_password: None,
            api_port: 3000,
        };
        assert_eq!(config.redis_url(), "redis://redis:6379/");
        config.redis_password = Some("pw".into());
        assert_eq!(config.redis_url(), "redis://:pw@redis:6379/");
    }
}

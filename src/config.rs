use rand::distributions::{Alphanumeric, DistString};

use crate::error::AppError;

#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub production: bool,
    pub token_expiry_days: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let production = std::env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ if production => {
                return Err(AppError::Config(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            _ => {
                tracing::warn!("JWT_SECRET not set, using a random secret for this process");
                Alphanumeric.sample_string(&mut rand::thread_rng(), 48)
            }
        };

        Ok(Config {
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parse_var("SERVER_PORT", "5001")?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://chat.db?mode=rwc".to_string()),
            jwt_secret,
            production,
            token_expiry_days: parse_var("TOKEN_EXPIRY_DAYS", "7")?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            db_min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", "30")?,
            rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", "100")?,
            cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
        })
    }

    /// Configuration for tests and embedded servers: in-memory database, fixed secret.
    pub fn for_testing() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            production: false,
            token_expiry_days: 7,
            db_max_connections: 1,
            db_min_connections: 1,
            request_timeout_secs: 30,
            rate_limit_per_minute: 10_000,
            cors_origin: None,
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn token_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.token_expiry_days)
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e)))
}

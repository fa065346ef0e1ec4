use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Which `Store` implementation backs the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => bail!("unknown STORE_BACKEND `{other}` (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND is postgres");
        }
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "metricboard".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "metricboard-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };
        Ok(Self {
            backend,
            database_url,
            max_connections,
            jwt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_known_names() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}

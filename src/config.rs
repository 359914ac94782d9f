use std::str::FromStr;

use anyhow::bail;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_bearer_secret: String,
    pub access_system_secret: String,
    pub refresh_bearer_secret: String,
    pub refresh_system_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub ttl_seconds: i64,
    pub sweep_seconds: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 120,
            sweep_seconds: 60,
        }
    }
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => bail!("unknown STORE `{other}`, expected `postgres` or `memory`"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub hash: HashConfig,
    pub storage: StorageConfig,
    pub google_client_ids: Vec<String>,
    /// Mail relay endpoint. Without it, codes are only logged.
    pub mail_relay_url: Option<String>,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = std::env::var("STORE")
            .map(|v| v.parse::<StoreKind>())
            .unwrap_or(Ok(StoreKind::Postgres))?;
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORE=postgres");
        }

        let jwt = JwtConfig {
            access_bearer_secret: std::env::var("JWT_ACCESS_BEARER_SECRET")?,
            access_system_secret: std::env::var("JWT_ACCESS_SYSTEM_SECRET")?,
            refresh_bearer_secret: std::env::var("JWT_REFRESH_BEARER_SECRET")?,
            refresh_system_secret: std::env::var("JWT_REFRESH_SYSTEM_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "storefront".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "storefront-users".into()),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parsed_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
        };

        let otp_defaults = OtpConfig::default();
        let otp = OtpConfig {
            ttl_seconds: parsed_or("OTP_TTL_SECONDS", otp_defaults.ttl_seconds),
            sweep_seconds: parsed_or("OTP_SWEEP_SECONDS", otp_defaults.sweep_seconds),
        };

        let hash_defaults = HashConfig::default();
        let hash = HashConfig {
            memory_kib: parsed_or("HASH_MEMORY_KIB", hash_defaults.memory_kib),
            iterations: parsed_or("HASH_ITERATIONS", hash_defaults.iterations),
            parallelism: parsed_or("HASH_PARALLELISM", hash_defaults.parallelism),
        };

        let storage = StorageConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")?,
            bucket: std::env::var("MINIO_BUCKET")?,
            access_key: std::env::var("MINIO_ACCESS_KEY")?,
            secret_key: std::env::var("MINIO_SECRET_KEY")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let google_client_ids = std::env::var("GOOGLE_CLIENT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            store,
            database_url,
            jwt,
            otp,
            hash,
            storage,
            google_client_ids,
            mail_relay_url: std::env::var("MAIL_RELAY_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_parses_case_insensitively() {
        assert_eq!("Memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!(" postgres ".parse::<StoreKind>().unwrap(), StoreKind::Postgres);
        assert!("mongo".parse::<StoreKind>().is_err());
    }

    #[test]
    fn otp_window_defaults_to_two_minutes() {
        assert_eq!(OtpConfig::default().ttl_seconds, 120);
    }
}

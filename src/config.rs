use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use crate::auth::authenticator::{DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_UNLOCK_IN_MINUTES};

pub const MIN_PRODUCTION_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Lambda runtime or `APP_ENV=production|prod` means production
    pub fn detect() -> Self {
        if env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
            return Self::Production;
        }

        match env::var("APP_ENV").as_deref() {
            Ok("production" | "prod") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Where user records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown storage backend {other:?} (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub storage: StorageBackend,
    pub database_url: String,
    pub db_pool_size: u32,
    pub jwt_secret: String,
    /// Shared with the OAuth gateway; provider callbacks are refused when unset
    pub oauth_gateway_secret: Option<String>,
    pub jwt_expiration_hours: i64,
    pub remember_for_days: i64,
    pub bcrypt_cost: u32,
    pub max_failed_attempts: i32,
    pub unlock_in_minutes: i64,
    pub attachment_base_url: String,
    pub frontend_url: String,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    /// Reads the process environment, loading `.env` first outside production
    pub fn from_env() -> Result<Self> {
        let environment = Environment::detect();

        tracing::info!(
            "🌍 Environment detected: {}",
            environment.as_str().to_uppercase()
        );

        Self::load_env_file(&environment);

        let config = Self::from_lookup(environment, |name| env::var(name).ok())?;

        tracing::info!("✅ Configuration loaded successfully");
        tracing::debug!("   Storage: {:?}", config.storage);
        tracing::debug!("   Database: {}", Self::mask_credentials(&config.database_url));
        tracing::debug!("   Frontend: {}", config.frontend_url);
        tracing::debug!("   Server: {}:{}", config.server_host, config.server_port);

        Ok(config)
    }

    /// Builds the configuration from `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(environment: Environment, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("APP_STORAGE") {
            Some(raw) => raw.parse()?,
            None => StorageBackend::Postgres,
        };
        let database_url = Self::get_database_url(&environment, storage, &lookup)?;
        let jwt_secret = Self::get_jwt_secret(&environment, &lookup)?;
        let oauth_gateway_secret = Self::get_gateway_secret(&environment, &lookup)?;
        let frontend_url = Self::get_frontend_url(&environment, &lookup);

        Ok(Self {
            storage,
            database_url,
            db_pool_size: parse_or(&lookup, "DB_POOL_SIZE", 10)?,
            jwt_secret,
            oauth_gateway_secret,
            jwt_expiration_hours: parse_or(&lookup, "JWT_EXPIRATION_HOURS", 1)?,
            remember_for_days: parse_or(&lookup, "REMEMBER_FOR_DAYS", 14)?,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            max_failed_attempts: parse_or(
                &lookup,
                "MAX_FAILED_ATTEMPTS",
                DEFAULT_MAX_FAILED_ATTEMPTS,
            )?,
            unlock_in_minutes: parse_or(&lookup, "UNLOCK_IN_MINUTES", DEFAULT_UNLOCK_IN_MINUTES)?,
            attachment_base_url: lookup("ATTACHMENT_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000/attachments".to_string()),
            frontend_url,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            environment,
        })
    }

    /// Variables are injected by the platform in production; `.env` is optional elsewhere
    fn load_env_file(environment: &Environment) {
        if environment.is_production() {
            tracing::info!("📦 Production mode: using injected environment variables");
            return;
        }

        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("📦 Development mode: loaded {}", path.display()),
            Err(err) if err.not_found() => {
                tracing::warn!("   .env file not found, using environment variables");
            }
            Err(err) => tracing::warn!("   .env file could not be read: {err}"),
        }
    }

    fn get_database_url<F>(
        environment: &Environment,
        storage: StorageBackend,
        lookup: &F,
    ) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            return Ok(url);
        }

        if environment.is_production() && storage == StorageBackend::Postgres {
            anyhow::bail!(
                "DATABASE_URL must be set in production! \
                 Configure it in Lambda environment variables."
            );
        }

        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            var("POSTGRES_USER", "postgres"),
            var("POSTGRES_PASSWORD", "postgres"),
            var("DB_HOST", "localhost"),
            var("DB_PORT", "5432"),
            var("POSTGRES_DB", "identity_db"),
        ))
    }

    fn get_jwt_secret<F>(environment: &Environment, lookup: &F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = match lookup("JWT_SECRET") {
            Some(s) => s,
            None if environment.is_production() => {
                tracing::error!("❌ JWT_SECRET not set in production!");
                anyhow::bail!("JWT_SECRET is required in production");
            }
            None => {
                tracing::warn!("⚠️  JWT_SECRET not set, using default (DEVELOPMENT ONLY!)");
                "dev_secret_key_change_in_production".to_string()
            }
        };

        if environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LENGTH {
            anyhow::bail!(
                "JWT_SECRET must be at least {MIN_PRODUCTION_SECRET_LENGTH} characters in production (current: {})",
                secret.len()
            );
        }

        Ok(secret)
    }

    fn get_gateway_secret<F>(environment: &Environment, lookup: &F) -> Result<Option<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(secret) = lookup("OAUTH_GATEWAY_SECRET").filter(|s| !s.trim().is_empty()) else {
            tracing::warn!("⚠️  OAUTH_GATEWAY_SECRET not set, provider callbacks are disabled");
            return Ok(None);
        };

        if environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LENGTH {
            anyhow::bail!(
                "OAUTH_GATEWAY_SECRET must be at least {MIN_PRODUCTION_SECRET_LENGTH} characters in production"
            );
        }

        Ok(Some(secret))
    }

    fn get_frontend_url<F>(environment: &Environment, lookup: &F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup("FRONTEND_URL").unwrap_or_else(|| {
            if environment.is_production() {
                "https://identity.example.com".to_string()
            } else {
                "http://localhost:8080".to_string()
            }
        })
    }

    /// Hides user and password of a connection URL
    pub fn mask_credentials(url: &str) -> String {
        if let Some(at_pos) = url.find('@')
            && let Some(scheme_end) = url.find("://")
        {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos..];
            return format!("{scheme}***:***{after_at}");
        }
        url.to_string()
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Storefront base URL, used to build provider return/cancel URLs
    pub frontend_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-process store
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Bearer token verification settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Shared settings for every payment provider call
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub default_currency: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub paypal: Option<PayPalSettings>,
    pub paystack: Option<PaystackSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalMode {
    Sandbox,
    Live,
}

#[derive(Debug, Clone)]
pub struct PayPalSettings {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PayPalMode,
    pub base_url: String,
    pub webhook_id: Option<String>,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PaystackSettings {
    pub secret_key: String,
    pub public_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub base_url: String,
}

/// Background worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub webhook_retry_enabled: bool,
    pub webhook_retry_interval_secs: u64,
    pub webhook_retry_max_attempts: i32,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.auth.validate()?;
        self.payments.validate()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "5000")?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        if !self.frontend_url.starts_with("http://") && !self.frontend_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "FRONTEND_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = if flag("SKIP_EXTERNALS", false) {
            None
        } else {
            Some(
                env::var("DATABASE_URL")
                    .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            )
        };

        Ok(DatabaseConfig {
            url,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: flag("DB_RUN_MIGRATIONS", true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(&self.url, Some(url) if url.is_empty()) {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| ConfigError::MissingVariable("JWT_SECRET".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentsConfig {
            default_currency: env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string())
                .to_uppercase(),
            timeout_secs: parse_var("PAYMENT_TIMEOUT_SECS", "15")?,
            max_retries: parse_var("PAYMENT_MAX_RETRIES", "2")?,
            paypal: PayPalSettings::from_env()?,
            paystack: PaystackSettings::from_env(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.timeout_secs > 30 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_TIMEOUT_SECS must be between 1 and 30".to_string(),
            ));
        }
        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue("DEFAULT_CURRENCY".to_string()));
        }
        if let Some(paypal) = &self.paypal {
            paypal.validate()?;
        }
        Ok(())
    }
}

impl PayPalMode {
    pub fn default_base_url(self) -> &'static str {
        match self {
            PayPalMode::Sandbox => "https://api.sandbox.paypal.com",
            PayPalMode::Live => "https://api.paypal.com",
        }
    }
}

impl PayPalSettings {
    /// Returns `None` when no client credentials are configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let (Some(client_id), Some(client_secret)) = (
            non_empty_var("PAYPAL_CLIENT_ID"),
            non_empty_var("PAYPAL_CLIENT_SECRET"),
        ) else {
            return Ok(None);
        };

        let mode = match env::var("PAYPAL_MODE")
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "sandbox" => PayPalMode::Sandbox,
            "live" => PayPalMode::Live,
            _ => return Err(ConfigError::InvalidValue("PAYPAL_MODE".to_string())),
        };

        Ok(Some(PayPalSettings {
            client_id,
            client_secret,
            mode,
            base_url: non_empty_var("PAYPAL_BASE_URL")
                .unwrap_or_else(|| mode.default_base_url().to_string()),
            webhook_id: non_empty_var("PAYPAL_WEBHOOK_ID"),
            token_ttl_secs: parse_var("PAYPAL_TOKEN_TTL_SECS", "28800")?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYPAL_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYPAL_TOKEN_TTL_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl PaystackSettings {
    pub fn from_env() -> Option<Self> {
        let secret_key = non_empty_var("PAYSTACK_SECRET_KEY")?;
        Some(PaystackSettings {
            secret_key,
            public_key: non_empty_var("PAYSTACK_PUBLIC_KEY"),
            webhook_secret: non_empty_var("PAYSTACK_WEBHOOK_SECRET"),
            base_url: non_empty_var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|| "https://api.paystack.co".to_string()),
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WorkerConfig {
            webhook_retry_enabled: flag("WEBHOOK_RETRY_ENABLED", true),
            webhook_retry_interval_secs: parse_var("WEBHOOK_RETRY_INTERVAL_SECS", "60")?,
            webhook_retry_max_attempts: parse_var("WEBHOOK_RETRY_MAX_ATTEMPTS", "5")?,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

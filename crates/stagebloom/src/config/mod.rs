use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const DEFAULT_CANDIDATE_QUOTA: u32 = 4;
const DEFAULT_TUTOR_CAPACITY: u32 = 5;
const MIN_PASSWORD_LENGTH: usize = 12;
const DEFAULT_REJECTION_REASON: &str = "None of the selected offers could be retained.";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle: LifecycleConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Business dials of the lifecycle engine.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Applications a candidate account may ever submit.
    pub candidate_quota: u32,
    /// Concurrent active internships a tutor may supervise.
    pub tutor_capacity: u32,
    /// Offset of the organisation's time zone; "today" is computed in it.
    pub utc_offset: FixedOffset,
    pub password_length: usize,
    /// Reason recorded when every selected offer has been rejected.
    pub default_rejection_reason: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            candidate_quota: DEFAULT_CANDIDATE_QUOTA,
            tutor_capacity: DEFAULT_TUTOR_CAPACITY,
            utc_offset: Utc.fix(),
            password_length: MIN_PASSWORD_LENGTH,
            default_rejection_reason: DEFAULT_REJECTION_REASON.to_string(),
        }
    }
}

impl LifecycleConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let candidate_quota = match env::var("APP_CANDIDATE_QUOTA") {
            Ok(raw) => parse_positive("APP_CANDIDATE_QUOTA", &raw)?,
            Err(_) => defaults.candidate_quota,
        };
        let tutor_capacity = match env::var("APP_TUTOR_CAPACITY") {
            Ok(raw) => parse_positive("APP_TUTOR_CAPACITY", &raw)?,
            Err(_) => defaults.tutor_capacity,
        };
        let utc_offset = match env::var("APP_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)?,
            Err(_) => defaults.utc_offset,
        };
        let password_length = match env::var("APP_PASSWORD_LENGTH") {
            Ok(raw) => {
                let length = parse_positive("APP_PASSWORD_LENGTH", &raw)? as usize;
                if length < MIN_PASSWORD_LENGTH {
                    return Err(ConfigError::PasswordTooShort {
                        minimum: MIN_PASSWORD_LENGTH,
                    });
                }
                length
            }
            Err(_) => defaults.password_length,
        };
        let default_rejection_reason = env::var("APP_DEFAULT_REJECTION_REASON")
            .ok()
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or(defaults.default_rejection_reason);

        Ok(Self {
            candidate_quota,
            tutor_capacity,
            utc_offset,
            password_length,
            default_rejection_reason,
        })
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Accepts `Z`, `+HH:MM` and `-HH:MM`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidUtcOffset {
        value: raw.to_string(),
    };

    if trimmed.eq_ignore_ascii_case("z") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    InvalidUtcOffset { value: String },
    PasswordTooShort { minimum: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (found '{value}')")
            }
            ConfigError::InvalidUtcOffset { value } => {
                write!(f, "APP_UTC_OFFSET must look like +HH:MM (found '{value}')")
            }
            ConfigError::PasswordTooShort { minimum } => {
                write!(f, "APP_PASSWORD_LENGTH must be at least {minimum}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

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
    pub approval: ApprovalSettings,
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
            approval: ApprovalSettings::load()?,
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

/// Knobs for the share-link approval engine, passed into the orchestrator
/// and bridges at construction time.
#[derive(Debug, Clone)]
pub struct ApprovalSettings {
    /// Whether the automated content scan gates new links. When disabled the
    /// scanner sub-status is seeded as an automatic pass.
    pub dlp_enabled: bool,
    /// DMZ deployments skip the human chain entirely and follow the scanner
    /// verdict alone.
    pub dmz_mode: bool,
    /// Security/compliance reviewers appended as a trailing any-of step on
    /// user chains.
    pub security_reviewers: Vec<String>,
    /// Channel identifier reported to the external audit system.
    pub audit_channel: String,
    /// Library receiving the backup copy of approved shared files.
    pub backup_library: Option<String>,
    /// Upper bound for a single scan/audit/notification call.
    pub remote_timeout: Duration,
    /// Cadence of the scan and audit poll loops.
    pub poll_interval: Duration,
}

impl ApprovalSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let dlp_enabled = parse_flag("APPROVAL_DLP_ENABLED", true)?;
        let dmz_mode = parse_flag("APPROVAL_DMZ_MODE", false)?;

        let security_reviewers = env::var("APPROVAL_SECURITY_REVIEWERS")
            .map(|raw| {
                raw.split(',')
                    .map(|part| part.trim().to_ascii_lowercase())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let audit_channel =
            env::var("APPROVAL_AUDIT_CHANNEL").unwrap_or_else(|_| "share-link-review".to_string());

        let backup_library = env::var("APPROVAL_BACKUP_LIBRARY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let remote_timeout = parse_seconds("APPROVAL_REMOTE_TIMEOUT_SECS", 10)?;
        let poll_interval = parse_seconds("APPROVAL_POLL_INTERVAL_SECS", 60)?;

        Ok(Self {
            dlp_enabled,
            dmz_mode,
            security_reviewers,
            audit_channel,
            backup_library,
            remote_timeout,
            poll_interval,
        })
    }
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            dlp_enabled: true,
            dmz_mode: false,
            security_reviewers: Vec::new(),
            audit_channel: "share-link-review".to_string(),
            backup_library: None,
            remote_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(60),
        }
    }
}

fn parse_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}

fn parse_seconds(key: &str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(Duration::from_secs(default)),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidSeconds {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidFlag { key: String, value: String },
    InvalidSeconds { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidFlag { key, value } => {
                write!(f, "{key} must be a boolean flag, got '{value}'")
            }
            ConfigError::InvalidSeconds { key, value } => {
                write!(f, "{key} must be a whole number of seconds, got '{value}'")
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

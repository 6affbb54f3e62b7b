use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_MEDIA_MAX_WIDTH: u32 = 1600;

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
    pub media: MediaConfig,
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

        let media = MediaConfig::from_env()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            media,
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where uploaded images are staged and stored, and how they are normalized.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub staging_dir: PathBuf,
    pub public_base: String,
    pub max_width: u32,
}

impl MediaConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let root = PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()));
        let staging_dir = env::var("MEDIA_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join("staging"));
        let public_base =
            env::var("MEDIA_PUBLIC_BASE").unwrap_or_else(|_| "/media".to_string());

        let max_width = match env::var("MEDIA_MAX_WIDTH") {
            Ok(raw) => match raw.trim().parse::<u32>() {
                Ok(width) if width > 0 => width,
                _ => return Err(ConfigError::InvalidMediaWidth { value: raw }),
            },
            Err(_) => DEFAULT_MEDIA_MAX_WIDTH,
        };

        Ok(Self {
            root,
            staging_dir,
            public_base,
            max_width,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidMediaWidth { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidMediaWidth { value } => {
                write!(f, "MEDIA_MAX_WIDTH must be a positive integer, found '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidMediaWidth { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mirror: MirrorConfig,
    pub blobs: BlobConfig,
    pub palette: PaletteConfig,
    pub rate_limit: RateLimitConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Emit logs as JSON lines instead of the human-readable formatter.
    /// Read from env var `LOG_FORMAT` (`json` enables it).
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Base URL for resource calls (locations, timeline, attachments)
    pub api_url: String,
    /// Base URL for media uploads (timeline insert with a media body)
    pub upload_url: String,
    /// OAuth token endpoint used to refresh expired access tokens
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Timeout applied to every outbound call, including attachment downloads
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaletteConfig {
    pub width: u32,
    pub height: u32,
    /// Number of panes rendered into the palette image
    pub colors: usize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for /notify
    pub notify_per_second: u32,
    /// Burst size for /notify
    pub notify_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub max_body_bytes: usize,
    /// Skip a share whose item/attachment pair was already processed for the same user.
    pub share_dedup: bool,
    /// When set, payloads must carry a matching `verifyToken`.
    pub verify_token: Option<String>,
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                log_json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            mirror: MirrorConfig {
                api_url: env::var("MIRROR_API_URL").unwrap_or(defaults.mirror.api_url),
                upload_url: env::var("MIRROR_UPLOAD_URL").unwrap_or(defaults.mirror.upload_url),
                token_url: env::var("GOOGLE_TOKEN_URL").unwrap_or(defaults.mirror.token_url),
                client_id: env::var("GOOGLE_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("GOOGLE_CLIENT_ID".to_string()))?,
                client_secret: env::var("GOOGLE_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("GOOGLE_CLIENT_SECRET".to_string()))?,
                timeout_seconds: env::var("HTTP_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("HTTP_TIMEOUT_SECONDS".to_string()))?,
            },
            blobs: BlobConfig {
                dir: env::var("BLOB_DIR").unwrap_or(defaults.blobs.dir),
            },
            palette: PaletteConfig {
                width: env::var("PALETTE_WIDTH")
                    .unwrap_or_else(|_| "640".to_string())
                    .parse()
                    .unwrap_or(640),
                height: env::var("PALETTE_HEIGHT")
                    .unwrap_or_else(|_| "360".to_string())
                    .parse()
                    .unwrap_or(360),
                colors: env::var("PALETTE_COLORS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                jpeg_quality: env::var("PALETTE_JPEG_QUALITY")
                    .unwrap_or_else(|_| "90".to_string())
                    .parse()
                    .unwrap_or(90),
            },
            rate_limit: RateLimitConfig {
                notify_per_second: env::var("RATE_LIMIT_NOTIFY_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                notify_burst: env::var("RATE_LIMIT_NOTIFY_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            notify: NotifyConfig {
                max_body_bytes: env::var("NOTIFY_MAX_BODY_BYTES")
                    .unwrap_or_else(|_| "1048576".to_string())
                    .parse()
                    .unwrap_or(1024 * 1024),
                share_dedup: env_flag("SHARE_DEDUP_ENABLED", false),
                verify_token: env::var("NOTIFY_VERIFY_TOKEN")
                    .ok()
                    .filter(|v| !v.is_empty()),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                log_json: false,
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            mirror: MirrorConfig {
                api_url: "https://www.googleapis.com/mirror/v1".to_string(),
                upload_url: "https://www.googleapis.com/upload/mirror/v1".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                timeout_seconds: 30,
            },
            blobs: BlobConfig {
                dir: "data/blobs".to_string(),
            },
            palette: PaletteConfig {
                width: 640,
                height: 360,
                colors: 5,
                jpeg_quality: 90,
            },
            rate_limit: RateLimitConfig {
                notify_per_second: 10,
                notify_burst: 50,
            },
            notify: NotifyConfig {
                max_body_bytes: 1024 * 1024,
                share_dedup: false,
                verify_token: None,
            },
        }
    }
}

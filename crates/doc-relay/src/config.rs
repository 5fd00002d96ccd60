use serde::{Deserialize, Serialize};

use crate::RelayResult;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the WebSocket endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Room every new connection joins before sending anything
    pub default_room: Option<String>,

    /// Longest accepted room id in bytes. No limit when unset.
    pub max_room_id_len: Option<usize>,

    /// CORS allowed origins, comma separated. Any origin when unset.
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> RelayResult<Self> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        Ok(envy::from_env::<Config>()?)
    }

    /// Build configuration from explicit key/value pairs
    pub fn from_vars<I>(vars: I) -> RelayResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter(vars)?)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Allowed CORS origins, or `None` for any origin
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_origins
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        if origins.is_empty() {
            None
        } else {
            Some(origins)
        }
    }

    /// Tracing filter used when `RUST_LOG` is not set
    pub fn default_log_filter(&self) -> String {
        format!(
            "doc_relay={level},tower_http={level},info",
            level = self.log_level
        )
    }

    /// Default room, ignoring an empty setting
    pub fn default_room(&self) -> Option<&str> {
        self.default_room.as_deref().filter(|room| !room.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            default_room: None,
            max_room_id_len: None,
            cors_origins: None,
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

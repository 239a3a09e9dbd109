use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::food::config::{FoodConfig, DEFAULT_RECOGNITION_HOST};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000/";

/// Settings for the subscription service (`--api` mode).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Key handed out by `/recognition/credential`. Kept on the server only.
    pub recognition_api_key: Option<String>,
    pub recognition_host: String,
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            db_path: PathBuf::from("data/server.db"),
            recognition_api_key: None,
            recognition_host: DEFAULT_RECOGNITION_HOST.to_string(),
            max_concurrent_requests: 64,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env::var("NUTRIBOX_PORT") {
            Ok(port) => port.trim().parse().context("NUTRIBOX_PORT must be a port number")?,
            Err(_) => defaults.port,
        };

        let max_concurrent_requests = match env::var("NUTRIBOX_MAX_CONCURRENT_REQUESTS") {
            Ok(n) => n
                .trim()
                .parse()
                .context("NUTRIBOX_MAX_CONCURRENT_REQUESTS must be a number")?,
            Err(_) => defaults.max_concurrent_requests,
        };

        Ok(Self {
            port,
            db_path: env::var("NUTRIBOX_SERVER_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            recognition_api_key: env::var("RECOGNITION_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            recognition_host: env::var("RECOGNITION_API_HOST").unwrap_or(defaults.recognition_host),
            max_concurrent_requests,
        })
    }
}

/// Settings for the interactive client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub server_url: String,
    pub food: FoodConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let food = FoodConfig::from_env().map_err(anyhow::Error::msg)?;

        Ok(Self {
            db_path: env::var("NUTRIBOX_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/nutribox.db")),
            server_url: env::var("NUTRIBOX_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            food,
        })
    }
}

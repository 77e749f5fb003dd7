use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "deepseek/deepseek-r1:free";

fn default_max_upload_size() -> usize {
    // 20 MB in bytes
    20 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub stats_dir: PathBuf,
    pub max_upload_size: usize,
    pub openrouter_key: Option<String>,
    pub openrouter_base_url: String,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup("DATAFORGE_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Failed to parse DATAFORGE_ADDR")?;

        let max_upload_size = match lookup("MAX_UPLOAD_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Failed to parse MAX_UPLOAD_SIZE '{}'", raw))?,
            None => default_max_upload_size(),
        };

        let openrouter_key = lookup("OPENROUTER_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Config {
            addr,
            upload_dir: lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()).into(),
            stats_dir: lookup("STATS_DIR").unwrap_or_else(|| "stats_exports".to_string()).into(),
            max_upload_size,
            openrouter_key,
            openrouter_base_url: lookup("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

pub fn load_config() -> Result<Config> {
    Config::from_env()
}

//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretBox;

use crate::registry::RegistryConfig;

/// Daemon configuration
#[derive(Debug)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Assistant registry endpoint, credentials and request settings
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from the environment (and `.env`) with defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("WEB3_VOICE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("web3-voice")
            }
        };

        let socket_path = data_dir.join("daemon.sock");

        let mut registry = RegistryConfig::default();
        if let Some(base_url) = lookup("VAPI_BASE_URL") {
            registry.base_url = base_url;
        }
        if let Some(secs) = lookup("VAPI_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid VAPI_TIMEOUT_SECS: {secs}"))?;
            registry.timeout = Duration::from_secs(secs);
        }
        registry.api_key = lookup("VAPI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(|key| SecretBox::new(Box::new(key)));

        Ok(Self {
            socket_path,
            data_dir,
            registry,
        })
    }

    /// Directory holding per-identity assistant lists
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("assistants")
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory for persistence data, relative to the home directory
const PERSIST_DIR: &str = ".config/matter-node-store";
const PERSIST_FILE: &str = "kvs.json";

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key, value));
        }
    }
    pairs
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub data_model: DataModelConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataModelConfig {
    /// Endpoints a node may hold at once.
    pub max_dynamic_endpoints: u16,
    /// Debounce window for attributes with deferred persistence.
    pub deferred_persistence_ms: u64,
    /// Size limit of TLV containers exchanged with the protocol provider.
    pub tlv_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl DataModelConfig {
    pub fn deferred_persistence_delay(&self) -> Duration {
        Duration::from_millis(self.deferred_persistence_ms)
    }
}

impl Default for DataModelConfig {
    fn default() -> Self {
        Self {
            max_dynamic_endpoints: 16,
            deferred_persistence_ms: 3000,
            tlv_buffer_size: 512,
        }
    }
}

impl StorageConfig {
    /// `~/.config/matter-node-store/kvs.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(PERSIST_DIR)
            .join(PERSIST_FILE)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("MATTER_MAX_DYNAMIC_ENDPOINTS")
            && let Ok(m) = max.parse()
        {
            config.data_model.max_dynamic_endpoints = m;
        }
        if let Ok(delay) = std::env::var("MATTER_DEFERRED_PERSISTENCE_MS")
            && let Ok(d) = delay.parse()
        {
            config.data_model.deferred_persistence_ms = d;
        }
        if let Ok(size) = std::env::var("MATTER_TLV_BUFFER_SIZE")
            && let Ok(s) = size.parse()
        {
            config.data_model.tlv_buffer_size = s;
        }
        if let Ok(path) = std::env::var("MATTER_STORAGE_PATH") {
            config.storage.path = PathBuf::from(path);
        }

        config
    }
}

use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// 32-byte hex key protecting stored router credentials.
    #[serde(default = "default_credential_key")]
    pub credential_key: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Interval of the background "sync all" task; 0 disables it.
    #[serde(default)]
    pub sync_interval_seconds: u64,

    /// Timeout applied to connection profiles created without one.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_address: Option<String>,
    database_url: Option<String>,
    credential_key: Option<String>,
    log_dir: Option<String>,
    sync_interval_seconds: Option<u64>,
    default_timeout_seconds: Option<u64>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://ispnexus.db?mode=rwc".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_credential_key() -> String {
    // Development convenience only. Override CREDENTIAL_KEY in production.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => read_file_config(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let config = Self::merge(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(env_config: PartialServerConfig, file_config: PartialServerConfig) -> Self {
        ServerConfig {
            listen_address: env_config
                .listen_address
                .or(file_config.listen_address)
                .unwrap_or_else(default_listen_address),
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .unwrap_or_else(default_database_url),
            credential_key: env_config
                .credential_key
                .or(file_config.credential_key)
                .unwrap_or_else(default_credential_key),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            sync_interval_seconds: env_config
                .sync_interval_seconds
                .or(file_config.sync_interval_seconds)
                .unwrap_or(0),
            default_timeout_seconds: env_config
                .default_timeout_seconds
                .or(file_config.default_timeout_seconds)
                .unwrap_or_else(default_timeout_seconds),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.default_timeout_seconds == 0 {
            return Err("DEFAULT_TIMEOUT_SECONDS must be greater than zero".to_string());
        }
        let key_len = hex::decode(&self.credential_key)
            .map_err(|e| format!("CREDENTIAL_KEY is not valid hex: {e}"))?
            .len();
        if key_len != 32 {
            return Err(format!("CREDENTIAL_KEY must be 32 bytes, got {key_len}"));
        }
        Ok(())
    }
}

fn read_file_config(path: &Path) -> Result<PartialServerConfig, String> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
    toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
}

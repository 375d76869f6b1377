use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Everything the daemon persists lives under this directory.
pub const DATA_DIR: &str = "./data";

pub const APP_NAME: &str = "shadowstream";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // "DEBUG", "INFO", "WARN", "ERROR"
    #[serde(default = "default_log_to_console")]
    pub log_to_console: bool,
}

fn default_bind() -> String {
    "0.0.0.0:12398".to_string()
}

fn default_log_to_console() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_to_console: true,
        }
    }
}

/// Get the data directory path, creating it (mode 0750) if needed
pub fn get_data_dir() -> PathBuf {
    let dir = PathBuf::from(DATA_DIR);
    if fs::create_dir_all(&dir).is_ok() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o750));
        }
    }
    dir
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the embedded store path
pub fn get_db_path() -> PathBuf {
    get_data_dir().join(format!("{}.db", APP_NAME))
}

/// Get the log file path
pub fn get_log_file_path() -> PathBuf {
    get_data_dir().join(format!("{}.log", APP_NAME))
}

/// Load configuration from file, or create default if not exists
pub fn load_config() -> AppConfig {
    let config_path = get_config_path();

    if config_path.exists() {
        if let Ok(content) = fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<AppConfig>(&content) {
                return config;
            }
        }
    }

    // Create default config file if it doesn't exist
    let default_config = AppConfig::default();
    let toml_content = r#"# shadowstream configuration

[server]
# Address the daemon binds; pointer files default to the loopback form of
# this port unless the account configures a pointer base.
bind = "0.0.0.0:12398"

[logging]
# Log level: "DEBUG", "INFO", "WARN", "ERROR"
# DEBUG includes per-file scanner activity
level = "INFO"

# Whether to also log to console (useful for development)
log_to_console = true
"#;

    fs::write(&config_path, toml_content).ok();
    default_config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:12398");
        assert_eq!(config.logging.level, "INFO");
        assert!(config.logging.log_to_console);
    }

    #[test]
    fn test_partial_config_parses() {
        let config: AppConfig = toml::from_str("[logging]\nlevel = \"DEBUG\"\n").unwrap();
        assert_eq!(config.logging.level, "DEBUG");
        assert!(config.logging.log_to_console);
        assert_eq!(config.server.bind, "0.0.0.0:12398");
    }
}

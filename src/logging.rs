use crate::config::{get_config_path, get_log_file_path, AppConfig};
use log::LevelFilter;
use simplelog::*;
use std::fs::OpenOptions;

/// Initialize the logging system based on config file settings.
/// Appends to the daemon's log file under ./data.
pub fn init_logging(config: &AppConfig) {
    let log_path = get_log_file_path();

    // Parse log level from config
    let level = match config.logging.level.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if config.logging.log_to_console {
        loggers.push(TermLogger::new(
            level,
            log_config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        loggers.push(WriteLogger::new(level, log_config.clone(), file));
    }

    if !loggers.is_empty() {
        CombinedLogger::init(loggers).ok();
    }

    log::info!("========================================");
    log::info!("shadowstream - session started");
    log::info!("========================================");
    log::info!("Log level: {:?}", level);
    log::info!("Log file: {:?}", log_path);
    log::info!("Config file: {:?}", get_config_path());
}

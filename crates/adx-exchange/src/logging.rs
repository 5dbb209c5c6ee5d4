use tracing::{info, Level};

use crate::config::LoggingConfig;

pub fn setup_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = parse_level(&config.level);

    // try_init so tests that initialize twice don't panic.
    let _ = tracing_subscriber::fmt()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_max_level(level)
        .try_init();

    info!("Logging initialized with level: {}", config.level);
    if !config.file.is_empty() {
        info!(
            "Log file: {} (rotation: {}, max {} MB)",
            config.file, config.rotation, config.max_size_mb
        );
    }

    Ok(())
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("verbose"), Level::INFO);
        assert_eq!(parse_level("WARN"), Level::WARN);
    }
}

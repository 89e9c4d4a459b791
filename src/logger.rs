use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::sync::Once;

// Define where to store logs
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "system.log";

static INIT: Once = Once::new();

/// Initializes the global logger.
///
/// Log level is controlled by the `RUST_LOG` environment variable and defaults to `info`.
/// Logs go to stderr (colored) and to `logs/system.log`. Only the first call has an effect,
/// so every entry point may call it.
pub fn init() {
    INIT.call_once(|| {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
        apply(log_level_filter);
    });
}

fn apply(log_level_filter: LevelFilter) {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory at '{}': {}", LOG_DIR, e);
    }

    let log_file_path = format!("{}/{}", LOG_DIR, LOG_FILE);

    let base_config = Dispatch::new().level(log_level_filter).level_for("tokio_util", LevelFilter::Warn).level_for("mio", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let base_config = base_config.chain(console_config);

    // Console output stays active when the log file cannot be opened.
    let base_config = match fern::log_file(&log_file_path) {
        Ok(file) => {
            let file_config = Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
                })
                .chain(file);
            base_config.chain(file_config)
        }
        Err(e) => {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            base_config
        }
    };

    base_config.apply().unwrap_or_else(|e| {
        eprintln!("Failed to apply logger configuration: {}", e);
    });

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}

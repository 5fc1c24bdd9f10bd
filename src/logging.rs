use log::LevelFilter;

/// Installs `env_logger` at `level`; `RUST_LOG` takes precedence when set.
/// Safe to call more than once, later calls are ignored.
pub fn init_logging(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::info!("Logging initialized at {}", level);
    }
}

//! Logging initialization for the CLI.
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Maps the number of `-v` flags to a level filter.
pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Logs to stderr so prompts and progress on stdout stay readable.
/// `RUST_LOG` overrides the level chosen with `-v`.
pub fn init(verbose: u8) {
    let level = level_for(verbose);

    Builder::new()
        .target(Target::Stderr)
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    log::debug!("logging initialized with level: {:?}", level);
}

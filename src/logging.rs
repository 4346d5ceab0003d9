//! Process logger setup

/// Install the stderr logger, filtered by `RUST_LOG` (default `info`)
///
/// Runs before configuration is loaded so config fallbacks can warn.
/// Returns false when a logger was already installed.
pub fn init_logging() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .try_init()
        .is_ok()
}

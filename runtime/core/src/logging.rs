use store_validator::schema::Settings;
use tracing_subscriber::EnvFilter;

/// Debug logging is on when either the command line or the settings file
/// asks for it.
pub fn debug_enabled(cli_debug: bool, settings: Option<&Settings>) -> bool {
    cli_debug || settings.is_some_and(|s| s.logging.debug)
}

/// Level used when `RUST_LOG` does not apply.
pub fn default_level(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

fn filter(debug: bool) -> EnvFilter {
    let level = default_level(debug);
    if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    }
}

/// Installs the global subscriber. `info` unless `debug` is set, in which case
/// `RUST_LOG` may override the level. Safe to call more than once.
pub fn init(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .try_init();
}

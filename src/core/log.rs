use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

const APP_TARGET: &str = "market_pulse";
/// HTTP stack chatter that is only worth seeing when something breaks.
const QUIET_TARGETS: [&str; 3] = ["hyper", "reqwest", "wiremock"];

/// Debug output for the crate when `verbose`, otherwise nothing. Warnings
/// from the HTTP stack still show up in verbose mode.
fn app_filter(verbose: bool) -> Targets {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::OFF
    };
    let quiet = if verbose {
        LevelFilter::WARN
    } else {
        LevelFilter::OFF
    };
    QUIET_TARGETS
        .iter()
        .fold(Targets::new().with_target(APP_TARGET, level), |t, target| {
            t.with_target(*target, quiet)
        })
}

/// Logs go to stderr, so `--json` output on stdout stays parseable.
/// `RUST_LOG` narrows the crate filter further.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "off" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(app_filter(verbose))
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_verbose_enables_crate_debug_only() {
        let filter = app_filter(true);
        assert!(filter.would_enable("market_pulse::core::cache", &Level::DEBUG));
        assert!(!filter.would_enable("market_pulse", &Level::TRACE));
        assert!(filter.would_enable("reqwest::connect", &Level::WARN));
        assert!(!filter.would_enable("hyper::proto", &Level::DEBUG));
    }

    #[test]
    fn test_quiet_disables_everything() {
        let filter = app_filter(false);
        assert!(!filter.would_enable("market_pulse", &Level::ERROR));
        assert!(!filter.would_enable("reqwest", &Level::ERROR));
    }
}

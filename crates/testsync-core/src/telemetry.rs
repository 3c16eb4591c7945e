//! Tracing initialisation for the testsync binary.
//!
//! What a sync logs, by level:
//!
//! - `info`: reconcile totals, header refresh, store schema checks and
//!   failures that fell back from polled frames
//! - `warn`: store retries, unreadable results files and failures reported
//!   without a location
//! - `error`: ambiguous record matches
//! - `debug`: each wait for stack frames and every store query
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` is used for every target.
/// With `json`, log lines are newline-delimited JSON written to stderr so
/// that stdout stays free for command output.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}

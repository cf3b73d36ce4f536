//! Log subscriber setup for the `fate` binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a fmt subscriber writing to stderr.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies, or `debug`
/// when `verbose` is on.
pub fn init(default_filter: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { default_filter };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

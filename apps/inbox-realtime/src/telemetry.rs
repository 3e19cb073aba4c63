use std::io;

use tracing::warn;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const FALLBACK_FILTER: &str = "info";

/// Installs the global subscriber. Logs go to stderr so stdout stays free
/// for `status` output. An unparsable filter falls back to `info` and is
/// reported once the subscriber is up.
pub fn init_tracing(filter: &str) -> Result<(), TryInitError> {
    let (env_filter, rejected) = match EnvFilter::try_new(filter) {
        Ok(env_filter) => (env_filter, None),
        Err(err) => (EnvFilter::new(FALLBACK_FILTER), Some(err)),
    };
    let fmt_layer = fmt::layer().with_target(false).with_writer(io::stderr);
    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    if let Some(err) = rejected {
        warn!(filter, error = %err, "invalid log filter, using {FALLBACK_FILTER}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let _ = init_tracing("not a [valid filter");
        assert!(init_tracing("debug").is_err());
    }
}

//! `tracing` subscriber setup for the binaries.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tubeharvest=info,tubeharvest_tools=info";

static INIT: Once = Once::new();

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG`. Safe to call
/// more than once; only the first call has an effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!("logging initialised twice");
    }
}

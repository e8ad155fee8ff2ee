//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "analyst=info,tower_http=info";

/// Filter used when `RUST_LOG` is not set and `--verbose` is passed.
pub const VERBOSE_FILTER: &str = "analyst=debug,tower_http=debug";

/// Install the global subscriber on stderr. `json` switches to one JSON
/// object per line.
pub fn init(verbose: bool, json: bool) -> Result<()> {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }
    Ok(())
}

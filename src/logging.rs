//! Process-wide tracing setup.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a fmt subscriber on stderr. `RUST_LOG` wins over `level`.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging init: {}", e))?;
    Ok(())
}

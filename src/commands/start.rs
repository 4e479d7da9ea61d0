use anyhow::Result;
use quality_gate::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Configuration errors are fatal here, before anything is spawned.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    info!(
        config = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Configuration loaded"
    );

    server::start_server(cfg).await
}

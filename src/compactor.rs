use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's journal once enough records have
/// piled up since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            error!("journal compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    debug!("{appends} appends since last compaction, compacting");
    engine.compact_journal().await?;
    Ok(true)
}

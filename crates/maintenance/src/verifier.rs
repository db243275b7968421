//! Background verification of the chunk store.

use silo_store::ChunkStore;
use std::sync::Arc;

/// Run one full chunk-store self-check with repair enabled. Failures are
/// logged and never abort the verifier loop; only reads and repairs of
/// malformed files touch the store.
pub async fn run_verify_pass(store: &Arc<dyn ChunkStore>) {
    tracing::info!("Store verify started");

    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match store.verify(parallelism, true).await {
        Ok(report) if report.is_clean() => {
            tracing::info!(checked = report.checked, "Store verify completed");
        }
        Ok(report) => {
            tracing::warn!(
                checked = report.checked,
                corrupt = report.corrupt,
                repaired = report.repaired,
                "Store verify found corrupt chunks"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Store verify failed");
        }
    }
}

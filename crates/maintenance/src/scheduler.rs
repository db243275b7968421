//! Periodic scheduling of GC and verifier passes.

use crate::{gc, metrics, verifier};
use silo_core::MaintenanceConfig;
use silo_store::{ChunkStore, IndexStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The maintenance subsystem: owns the store handles and hosts the two
/// periodic loops. GC and verify tick independently and may overlap each
/// other, but passes of the same kind never do; each loop runs its pass
/// inline on its own task.
pub struct Maintenance {
    chunk_store: Arc<dyn ChunkStore>,
    index_store: Arc<dyn IndexStore>,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        chunk_store: Arc<dyn ChunkStore>,
        index_store: Arc<dyn IndexStore>,
        config: MaintenanceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chunk_store,
            index_store,
            config,
        })
    }

    /// Spawn both loops. Each runs one immediate pass, then one pass per
    /// tick, until the process exits.
    pub fn spawn(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let gc = tokio::spawn(self.clone().gc_loop());
        let verify = tokio::spawn(self.clone().verify_loop());
        (gc, verify)
    }

    async fn gc_loop(self: Arc<Self>) {
        tracing::debug!(
            interval_secs = self.config.gc_interval_secs,
            "Initializing GC loop"
        );
        let budget = gc::live_size_max(self.config.cache_size_bytes());

        let mut ticker = tokio::time::interval(self.config.gc_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            metrics::measure(&metrics::GC_TIME_MS, async {
                match gc::run_gc_pass(&self.chunk_store, &self.index_store, budget).await {
                    Ok(stats) => {
                        tracing::info!(
                            live_chunks = stats.live_chunks,
                            dead_chunks = stats.dead_chunks,
                            dead_indices = stats.dead_indices,
                            "GC pass finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "GC pass aborted");
                    }
                }
            })
            .await;
        }
    }

    async fn verify_loop(self: Arc<Self>) {
        tracing::debug!(
            interval_secs = self.config.verify_interval_secs,
            "Initializing verifier loop"
        );

        let mut ticker = tokio::time::interval(self.config.verify_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            metrics::measure(
                &metrics::VERIFY_TIME_MS,
                verifier::run_verify_pass(&self.chunk_store),
            )
            .await;
        }
    }
}

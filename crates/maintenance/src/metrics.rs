//! Prometheus metrics for the maintenance subsystem.
//!
//! Gauges are set once per pass; counters accumulate across passes. Every
//! pass, including error-aborted ones, adds to the `*_time_local` counters.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::future::Future;
use std::sync::{LazyLock, Once};
use std::time::Instant;

/// Global Prometheus registry for all maintenance metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chunk store gauges, set per GC pass.
pub static CHUNK_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("silo_chunk_count_local", "Number of live chunks")
        .expect("metric creation failed")
});

pub static CHUNK_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "silo_chunk_size_local",
        "Size of the live chunks in bytes",
    )
    .expect("metric creation failed")
});

pub static CHUNK_DIR_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "silo_chunk_dir_count",
        "Number of directories the chunks are stored in",
    )
    .expect("metric creation failed")
});

// GC counters, added per pass.
pub static CHUNK_GC_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_chunk_gc_count_local",
        "Number of chunks deleted by GC",
    )
    .expect("metric creation failed")
});

pub static CHUNK_GC_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_chunk_gc_bytes_local",
        "Size of chunks deleted by GC in bytes",
    )
    .expect("metric creation failed")
});

pub static CHUNK_WALK_MS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_chunk_walk_local",
        "Total time spent walking the chunk store in ms",
    )
    .expect("metric creation failed")
});

// Index store metrics.
pub static INDEX_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("silo_index_count_local", "Number of indices")
        .expect("metric creation failed")
});

pub static INFLATED_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "silo_inflated_size_local",
        "Size of the cache contents in bytes if they were inflated",
    )
    .expect("metric creation failed")
});

pub static INDEX_GC_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_index_gc_count_local",
        "Number of indices deleted by GC",
    )
    .expect("metric creation failed")
});

pub static INDEX_WALK_MS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_index_walk_local",
        "Total time spent walking the index store in ms",
    )
    .expect("metric creation failed")
});

// Budget and loop timing.
pub static MAX_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "silo_max_size_local",
        "Byte budget for live chunks in the local cache",
    )
    .expect("metric creation failed")
});

pub static GC_TIME_MS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("silo_gc_time_local", "Total time spent in GC in ms")
        .expect("metric creation failed")
});

pub static VERIFY_TIME_MS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_verify_time_local",
        "Total time spent in verification in ms",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; subsequent calls are no-ops.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHUNK_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_SIZE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_DIR_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_GC_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_GC_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_WALK_MS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INDEX_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INFLATED_SIZE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INDEX_GC_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INDEX_WALK_MS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MAX_SIZE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_TIME_MS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VERIFY_TIME_MS.clone()))
            .expect("metric registration failed");
    });
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Run a future, adding its wall-clock duration in milliseconds to `counter`.
pub async fn measure<F, T>(counter: &IntCounter, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    counter.inc_by(start.elapsed().as_millis() as u64);
    out
}

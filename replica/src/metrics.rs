//! Metrics for the execution and state-transfer paths.
//!
//! Counters are registered into a local Prometheus registry; exposing them
//! over HTTP is left to the embedding process.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Registry holding every counter of this crate
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();

    /// Ordered commands applied to the application
    pub static ref ORDERED_COUNTER: IntCounter =
        IntCounter::new("ordered_commands", "ordered commands executed").unwrap();

    /// Unordered commands applied to the application
    pub static ref UNORDERED_COUNTER: IntCounter =
        IntCounter::new("unordered_commands", "unordered commands executed").unwrap();

    /// Batches appended to the command log
    pub static ref BATCH_COUNTER: IntCounter =
        IntCounter::new("batches_appended", "command batches appended").unwrap();

    /// Checkpoints recorded into the command log
    pub static ref CHECKPOINT_COUNTER: IntCounter =
        IntCounter::new("checkpoints_taken", "checkpoints taken").unwrap();

    /// State-transfer operations, labeled by direction (served/installed)
    pub static ref TRANSFER_COUNTER_VEC: IntCounterVec = IntCounterVec::new(
        Opts::new("state_transfers", "state transfer operations"),
        &["direction"]
    )
    .unwrap();
}

/// Registers all metric collectors with the registry.
pub fn init_registry() {
    let _ = REGISTRY_INSTANCE.register(Box::new(ORDERED_COUNTER.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(UNORDERED_COUNTER.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(BATCH_COUNTER.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(CHECKPOINT_COUNTER.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(TRANSFER_COUNTER_VEC.clone()));
}

//! Recoverable execution and state-transfer core for a replicated state
//! machine tolerating Byzantine faults.
//!
//! The ordering layer feeds decided commands to [`RecoverableExecutor`],
//! which applies them to the application exactly once per slot, records
//! command batches into the command log, takes a checkpoint every
//! `checkpoint_period` slots, and serves `get_state`/`set_state` so a
//! replica that is behind, restarting or newly joining can be brought to
//! the same logical point as its peers.
//!
//! Agreement, transport, message authentication and proof construction are
//! external; this crate only defines the contract those pieces plug into.

pub mod config;
pub mod digest;
pub mod error;
pub mod executor;
pub mod log;
pub mod metrics;
pub mod state;

pub use config::ReplicaConfig;
pub use error::{ReplicaError, Result};
pub use executor::{Application, RecoverableExecutor, SlotObserver};
pub use state::{CommandBatch, Checkpoint, DecisionProof, ExecutionContext, StateDescriptor};

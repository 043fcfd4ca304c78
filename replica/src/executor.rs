//! Recoverable executor.
//!
//! Applies consensus-ordered commands to the application, accumulates them
//! into per-slot batches, records batches and periodic checkpoints into the
//! command log, and serves the state-transfer protocol
//! (`get_state`/`set_state`).

use std::sync::Mutex;

use crate::config::ReplicaConfig;
use crate::digest::digest;
use crate::error::{ReplicaError, Result};
use crate::log::{DiskLog, MemoryLog, StateLog};
use crate::metrics;
use crate::state::{CommandBatch, ExecutionContext, StateDescriptor};

/// Application hooks implemented outside this core.
///
/// The ordered path must be deterministic: two replicas feeding identical
/// command/context sequences through `execute_ordered` end with
/// bit-identical state. The correctness of state transfer rests entirely
/// on that property.
pub trait Application: Send {
    /// Applies one consensus-ordered command and returns the reply bytes.
    fn execute_ordered(&mut self, command: &[u8], ctx: &ExecutionContext)
        -> anyhow::Result<Vec<u8>>;

    /// Read-only or non-deterministic-safe path; never logged or replayed.
    fn execute_unordered(
        &mut self,
        command: &[u8],
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Vec<u8>>;

    /// Serializes the full application state.
    fn get_snapshot(&self) -> anyhow::Result<Vec<u8>>;

    /// Replaces the full application state with a snapshot.
    fn install_snapshot(&mut self, snapshot: &[u8]) -> anyhow::Result<()>;
}

/// Callback into the state manager, notified after every flush that a slot
/// is now the latest fully processed one.
pub trait SlotObserver: Send + Sync {
    fn last_eid_advanced(&self, eid: u64);
}

/// In-flight buffer of commands accumulated for the current slot. Owned by
/// the executor and reset atomically on flush.
#[derive(Default)]
struct PendingBatch {
    commands: Vec<Vec<u8>>,
    contexts: Vec<ExecutionContext>,
}

impl PendingBatch {
    fn push(&mut self, command: Vec<u8>, ctx: ExecutionContext) {
        self.commands.push(command);
        self.contexts.push(ctx);
    }

    fn take(&mut self) -> (Vec<Vec<u8>>, Vec<ExecutionContext>) {
        (
            std::mem::take(&mut self.commands),
            std::mem::take(&mut self.contexts),
        )
    }
}

/// Recoverable execution core for one replica.
///
/// Two coarse mutual-exclusion regions protect all shared state: the
/// execution/snapshot region (`app`) keeps application mutation from
/// overlapping snapshot capture or installation, and the log region
/// (`log`) keeps transfer reads from observing a half-written batch or
/// checkpoint. Ordered commands arrive from a single consensus stream;
/// `get_state`/`set_state` may be called concurrently from a catch-up
/// path.
pub struct RecoverableExecutor<A: Application> {
    config: ReplicaConfig,
    app: Mutex<A>,
    log: Mutex<Box<dyn StateLog>>,
    pending: Mutex<PendingBatch>,
    observer: Option<Box<dyn SlotObserver>>,
}

impl<A: Application> RecoverableExecutor<A> {
    /// Builds the executor, establishing the initial checkpoint before any
    /// command is accepted. With a durable log configured, previously
    /// persisted state is replayed into the application before returning.
    pub fn new(config: ReplicaConfig, app: A) -> Result<Self> {
        config.validate()?;

        let snapshot = app.get_snapshot()?;
        let hash = digest(&snapshot);

        let mut recovered = None;
        let log: Box<dyn StateLog> = if config.is_to_log && config.log_to_disk {
            let (disk, stored) = DiskLog::open(
                config.replica_dir(),
                snapshot,
                hash,
                config.sync_log,
                config.sync_ckp,
            )?;
            recovered = stored;
            Box::new(disk)
        } else {
            Box::new(MemoryLog::new(snapshot, hash))
        };

        let executor = RecoverableExecutor {
            config,
            app: Mutex::new(app),
            log: Mutex::new(log),
            pending: Mutex::new(PendingBatch::default()),
            observer: None,
        };

        if let Some(stored) = recovered {
            let last = executor.install_and_replay(&stored)?;
            log::info!("recovered durable state up to eid {}", last);
        }

        Ok(executor)
    }

    /// Installs the state manager callback.
    pub fn with_observer(mut self, observer: Box<dyn SlotObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Applies one consensus-ordered command and accumulates it for the
    /// current slot, flushing when the batch is complete. Returns `None`
    /// for no-op placeholders, which never reach the application.
    pub fn execute_ordered(
        &self,
        command: &[u8],
        ctx: &ExecutionContext,
    ) -> Result<Option<Vec<u8>>> {
        let reply = if ctx.noop {
            None
        } else {
            let mut app = self.app.lock().unwrap();
            Some(app.execute_ordered(command, ctx)?)
        };
        metrics::ORDERED_COUNTER.inc();

        let mut pending = self.pending.lock().unwrap();
        pending.push(command.to_vec(), ctx.clone());
        if ctx.last_in_batch {
            let (commands, contexts) = pending.take();
            drop(pending);
            self.flush(ctx.eid, commands, contexts)?;
        }

        Ok(reply)
    }

    /// Applies a command directly to application state with no batching,
    /// logging or checkpoint interaction.
    pub fn execute_unordered(&self, command: &[u8], ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut app = self.app.lock().unwrap();
        let reply = app.execute_unordered(command, ctx)?;
        metrics::UNORDERED_COUNTER.inc();
        Ok(reply)
    }

    /// Advances slot bookkeeping for a placeholder decision without an
    /// application-state effect.
    pub fn no_op(&self, ctx: &ExecutionContext) -> Result<()> {
        let mut ctx = ctx.clone();
        ctx.noop = true;
        self.execute_ordered(&[], &ctx).map(|_| ())
    }

    /// Read path of the state-transfer protocol: a transferable descriptor
    /// for every recorded slot up to `eid`.
    pub fn get_state(&self, eid: u64, include_snapshot: bool) -> StateDescriptor {
        let log = self.log.lock().unwrap();
        let descriptor = log.build_descriptor(eid, include_snapshot);
        drop(log);
        metrics::TRANSFER_COUNTER_VEC
            .with_label_values(&["served"])
            .inc();
        log::info!(
            "serving state up to eid {}, usable: {}",
            eid,
            descriptor.is_usable()
        );
        descriptor
    }

    /// Rebuilds this replica's state from a received descriptor: install
    /// the snapshot, then replay every recorded batch after the
    /// checkpoint, in order, discarding replies.
    ///
    /// An unusable descriptor (no proof, or no snapshot bytes) applies
    /// nothing and returns the current last eid unchanged. A replay
    /// failure aborts the catch-up attempt with [`ReplicaError::Replay`];
    /// the replica must not continue on potentially divergent state.
    pub fn set_state(&self, descriptor: &StateDescriptor) -> Result<u64> {
        if !descriptor.is_usable() {
            log::warn!("refusing state descriptor without proof or snapshot; nothing applied");
            return Ok(self.last_eid());
        }
        self.install_and_replay(descriptor)
    }

    /// Latest fully processed slot: the log tail, or the checkpoint slot
    /// when no batches follow it. Answers the state manager's startup
    /// "current slot" query.
    pub fn last_eid(&self) -> u64 {
        let log = self.log.lock().unwrap();
        log.last_eid().unwrap_or_else(|| log.checkpoint_eid())
    }

    /// Descriptor installation shared by `set_state` and durable-log
    /// startup recovery (which trusts its own disk and skips the proof
    /// gate).
    fn install_and_replay(&self, descriptor: &StateDescriptor) -> Result<u64> {
        let checkpoint = match &descriptor.checkpoint {
            Some(checkpoint) => checkpoint,
            None => return Ok(self.last_eid()),
        };
        let snapshot = match &checkpoint.snapshot {
            Some(snapshot) => snapshot,
            None => return Ok(self.last_eid()),
        };
        let last_eid = descriptor.last_eid.unwrap_or(checkpoint.eid);

        {
            let mut log = self.log.lock().unwrap();
            log.install(descriptor)?;
        }

        log::info!(
            "updating application state from eid {} to eid {}",
            checkpoint.eid,
            last_eid
        );

        let mut app = self.app.lock().unwrap();
        app.install_snapshot(snapshot)?;

        for eid in checkpoint.eid + 1..=last_eid {
            let batch = match descriptor.batches.get(&eid) {
                // absent and no-op slots replay exactly as they were
                // executed: no application effect
                Some(batch) if !batch.is_noop() => batch,
                _ => continue,
            };
            if batch.commands.len() != batch.contexts.len() {
                return Err(ReplicaError::Consistency {
                    eid,
                    reason: format!(
                        "{} commands but {} contexts",
                        batch.commands.len(),
                        batch.contexts.len()
                    ),
                });
            }
            for (command, ctx) in batch.commands.iter().zip(&batch.contexts) {
                app.execute_ordered(command, ctx)
                    .map_err(|source| ReplicaError::Replay { eid, source })?;
            }
        }
        drop(app);

        metrics::TRANSFER_COUNTER_VEC
            .with_label_values(&["installed"])
            .inc();
        Ok(last_eid)
    }

    /// Finalizes the batch for `eid`: a checkpoint on period boundaries,
    /// otherwise a tail append. Inconsistent batch data aborts the flush
    /// with nothing recorded.
    fn flush(&self, eid: u64, commands: Vec<Vec<u8>>, contexts: Vec<ExecutionContext>) -> Result<()> {
        if commands.len() != contexts.len() {
            return Err(ReplicaError::Consistency {
                eid,
                reason: format!("{} commands but {} contexts", commands.len(), contexts.len()),
            });
        }
        if let Some(stray) = contexts.iter().find(|ctx| ctx.eid != eid) {
            return Err(ReplicaError::Consistency {
                eid,
                reason: format!("context for eid {} in batch finalized at eid {}", stray.eid, eid),
            });
        }

        if self.config.is_to_log {
            if eid > 0 && eid % self.config.checkpoint_period == 0 {
                log::info!("performing checkpoint for eid {}", eid);
                // Execution region held only for the snapshot itself;
                // hashing and persistence happen outside it.
                let snapshot = self.app.lock().unwrap().get_snapshot()?;
                let hash = digest(&snapshot);
                log::debug!("checkpoint digest {}", hex::encode(&hash));
                let proof = contexts.last().and_then(|ctx| ctx.proof.clone());
                self.log
                    .lock()
                    .unwrap()
                    .new_checkpoint(snapshot, hash, eid, proof)?;
                metrics::CHECKPOINT_COUNTER.inc();
            } else {
                let batch = CommandBatch::new(commands, contexts);
                self.log.lock().unwrap().append_batch(eid, batch)?;
                metrics::BATCH_COUNTER.inc();
            }
        }

        if let Some(observer) = &self.observer {
            observer.last_eid_advanced(eid);
        }
        Ok(())
    }
}

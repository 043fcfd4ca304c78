//! Command log: the current checkpoint plus every batch recorded since it.

use std::collections::BTreeMap;

use crate::error::{ReplicaError, Result};
use crate::state::{Checkpoint, CommandBatch, DecisionProof, StateDescriptor};

pub mod disk;

pub use disk::DiskLog;

/// Read/append contract shared by the in-memory log and the durable
/// adapter. All access goes through the executor's log region, so
/// implementations do not need their own locking.
pub trait StateLog: Send {
    /// Replaces the current checkpoint, drops all prior batches and resets
    /// tail tracking to "none since checkpoint".
    fn new_checkpoint(
        &mut self,
        snapshot: Vec<u8>,
        hash: Vec<u8>,
        eid: u64,
        proof: Option<DecisionProof>,
    ) -> Result<()>;

    /// Appends a finalized batch as the new tail. A slot not greater than
    /// the current tail is logged and ignored.
    fn append_batch(&mut self, eid: u64, batch: CommandBatch) -> Result<()>;

    /// Builds a transferable descriptor covering every recorded slot up to
    /// `eid`. Downgraded to [`StateDescriptor::empty`] when no proof can be
    /// attached to the most recent decision it would cover.
    fn build_descriptor(&self, eid: u64, include_snapshot: bool) -> StateDescriptor;

    /// Replaces checkpoint and batches wholesale from a received
    /// descriptor. Used only while installing transferred state.
    fn install(&mut self, descriptor: &StateDescriptor) -> Result<()>;

    /// Slot of the current checkpoint.
    fn checkpoint_eid(&self) -> u64;

    /// Tail slot, or `None` immediately after a checkpoint.
    fn last_eid(&self) -> Option<u64>;
}

/// In-memory command log.
pub struct MemoryLog {
    checkpoint: Checkpoint,
    batches: BTreeMap<u64, CommandBatch>,
    last_eid: Option<u64>,
}

impl MemoryLog {
    /// Log seeded with the initial application snapshot as the slot-0
    /// checkpoint.
    pub fn new(snapshot: Vec<u8>, hash: Vec<u8>) -> Self {
        MemoryLog {
            checkpoint: Checkpoint::new(0, snapshot, hash, None),
            batches: BTreeMap::new(),
            last_eid: None,
        }
    }

    /// Log resuming from a previously recorded checkpoint.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        MemoryLog {
            checkpoint,
            batches: BTreeMap::new(),
            last_eid: None,
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn batches(&self) -> &BTreeMap<u64, CommandBatch> {
        &self.batches
    }

    fn tail(&self) -> u64 {
        self.last_eid.unwrap_or(self.checkpoint.eid)
    }
}

impl StateLog for MemoryLog {
    fn new_checkpoint(
        &mut self,
        snapshot: Vec<u8>,
        hash: Vec<u8>,
        eid: u64,
        proof: Option<DecisionProof>,
    ) -> Result<()> {
        self.checkpoint = Checkpoint::new(eid, snapshot, hash, proof);
        self.batches.clear();
        self.last_eid = None;
        Ok(())
    }

    fn append_batch(&mut self, eid: u64, batch: CommandBatch) -> Result<()> {
        let tail = self.tail();
        if eid <= tail {
            log::warn!("ignoring stale batch for eid {} (tail is {})", eid, tail);
            return Ok(());
        }
        self.batches.insert(eid, batch);
        self.last_eid = Some(eid);
        Ok(())
    }

    fn build_descriptor(&self, eid: u64, include_snapshot: bool) -> StateDescriptor {
        if eid < self.checkpoint.eid {
            // state older than the checkpoint is gone
            return StateDescriptor::empty();
        }

        let batches: BTreeMap<u64, CommandBatch> = self
            .batches
            .range(..=eid)
            .map(|(slot, batch)| (*slot, batch.clone()))
            .collect();

        let last_proof = match batches.values().last() {
            Some(batch) => batch.proof(),
            None => self.checkpoint.proof.clone(),
        };
        let last_proof = match last_proof {
            Some(proof) => proof,
            // A replica must never claim authority over state it cannot
            // prove.
            None => return StateDescriptor::empty(),
        };

        let last_eid = batches.keys().last().copied().unwrap_or(self.checkpoint.eid);
        let checkpoint = if include_snapshot {
            self.checkpoint.clone()
        } else {
            self.checkpoint.without_snapshot()
        };

        StateDescriptor {
            checkpoint: Some(checkpoint),
            batches,
            last_proof: Some(last_proof),
            last_eid: Some(last_eid),
        }
    }

    fn install(&mut self, descriptor: &StateDescriptor) -> Result<()> {
        let checkpoint = descriptor.checkpoint.as_ref().ok_or_else(|| {
            ReplicaError::Consistency {
                eid: descriptor.last_eid.unwrap_or(0),
                reason: "descriptor has no checkpoint".to_string(),
            }
        })?;
        self.checkpoint = checkpoint.clone();
        self.batches = descriptor.batches.clone();
        self.last_eid = self.batches.keys().last().copied();
        Ok(())
    }

    fn checkpoint_eid(&self) -> u64 {
        self.checkpoint.eid
    }

    fn last_eid(&self) -> Option<u64> {
        self.last_eid
    }
}

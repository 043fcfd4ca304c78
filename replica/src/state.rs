//! Data types exchanged between the executor, the command log and the
//! state-transfer path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque correctness proof for one consensus decision.
///
/// Proof construction and verification belong to the agreement layer; this
/// crate only carries proofs so that a receiver can refuse unproven state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionProof(pub Vec<u8>);

/// Per-command execution metadata delivered by the ordering layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Slot id of the consensus decision this command belongs to.
    pub eid: u64,
    /// Position of the command within its slot's batch.
    pub position: usize,
    /// True for the final command of the batch; triggers a flush.
    pub last_in_batch: bool,
    /// True for a placeholder decision carrying no application effect.
    pub noop: bool,
    /// Proof of the decision at `eid`, when the ordering layer attached one.
    pub proof: Option<DecisionProof>,
}

impl ExecutionContext {
    pub fn new(eid: u64, position: usize, last_in_batch: bool) -> Self {
        ExecutionContext {
            eid,
            position,
            last_in_batch,
            noop: false,
            proof: None,
        }
    }

    /// Context for a placeholder decision occupying a whole slot.
    pub fn no_op(eid: u64) -> Self {
        ExecutionContext {
            eid,
            position: 0,
            last_in_batch: true,
            noop: true,
            proof: None,
        }
    }

    pub fn with_proof(mut self, proof: DecisionProof) -> Self {
        self.proof = Some(proof);
        self
    }
}

/// All commands decided together for one slot, in execution order.
///
/// Commands and contexts are parallel; their lengths are checked when the
/// batch is finalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<Vec<u8>>,
    pub contexts: Vec<ExecutionContext>,
}

impl CommandBatch {
    pub fn new(commands: Vec<Vec<u8>>, contexts: Vec<ExecutionContext>) -> Self {
        CommandBatch { commands, contexts }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// A batch recorded for a placeholder decision; replays with no
    /// application effect.
    pub fn is_noop(&self) -> bool {
        self.contexts.first().map_or(true, |ctx| ctx.noop)
    }

    /// Proof of the decision this batch was recorded for, carried by its
    /// final context.
    pub fn proof(&self) -> Option<DecisionProof> {
        self.contexts.last().and_then(|ctx| ctx.proof.clone())
    }
}

/// Full application-state snapshot taken at a specific slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Slot at which the snapshot was taken.
    pub eid: u64,
    /// Snapshot bytes; absent in descriptors built without the payload.
    pub snapshot: Option<Vec<u8>>,
    /// Digest of the snapshot bytes at the moment it was recorded.
    pub hash: Vec<u8>,
    /// Proof of the decision that triggered this checkpoint, carried
    /// forward so a descriptor with zero trailing batches stays provable.
    pub proof: Option<DecisionProof>,
}

impl Checkpoint {
    pub fn new(eid: u64, snapshot: Vec<u8>, hash: Vec<u8>, proof: Option<DecisionProof>) -> Self {
        Checkpoint {
            eid,
            snapshot: Some(snapshot),
            hash,
            proof,
        }
    }

    /// Copy of this checkpoint with the snapshot payload stripped.
    pub fn without_snapshot(&self) -> Checkpoint {
        Checkpoint {
            eid: self.eid,
            snapshot: None,
            hash: self.hash.clone(),
            proof: self.proof.clone(),
        }
    }
}

/// The unit exchanged during catch-up: a checkpoint, the batches recorded
/// after it, and the proof of the most recent decision it covers.
///
/// The default value is the empty descriptor, the explicit "I hold no
/// usable state" signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDescriptor {
    pub checkpoint: Option<Checkpoint>,
    pub batches: BTreeMap<u64, CommandBatch>,
    pub last_proof: Option<DecisionProof>,
    /// Most recent slot this descriptor brings a receiver to.
    pub last_eid: Option<u64>,
}

impl StateDescriptor {
    pub fn empty() -> Self {
        StateDescriptor::default()
    }

    /// A descriptor may only be installed when it carries snapshot bytes
    /// and a proof for its most recent decision.
    pub fn is_usable(&self) -> bool {
        self.last_proof.is_some()
            && self
                .checkpoint
                .as_ref()
                .map_or(false, |ckp| ckp.snapshot.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_descriptor_is_unusable() {
        assert!(!StateDescriptor::empty().is_usable());
    }

    #[test]
    fn test_descriptor_without_snapshot_is_unusable() {
        let ckp = Checkpoint::new(5, b"snap".to_vec(), vec![0u8; 32], None);
        let descriptor = StateDescriptor {
            checkpoint: Some(ckp.without_snapshot()),
            batches: BTreeMap::new(),
            last_proof: Some(DecisionProof(vec![1])),
            last_eid: Some(5),
        };
        assert!(!descriptor.is_usable());
    }

    #[test]
    fn test_descriptor_usable_with_proof_and_snapshot() {
        let descriptor = StateDescriptor {
            checkpoint: Some(Checkpoint::new(5, b"snap".to_vec(), vec![0u8; 32], None)),
            batches: BTreeMap::new(),
            last_proof: Some(DecisionProof(vec![1])),
            last_eid: Some(5),
        };
        assert!(descriptor.is_usable());
    }

    #[test]
    fn test_batch_noop_and_proof() {
        let batch = CommandBatch::new(
            vec![Vec::new()],
            vec![ExecutionContext::no_op(3).with_proof(DecisionProof(vec![9]))],
        );
        assert!(batch.is_noop());
        assert_eq!(batch.proof(), Some(DecisionProof(vec![9])));

        let batch = CommandBatch::new(
            vec![b"cmd".to_vec()],
            vec![ExecutionContext::new(4, 0, true)],
        );
        assert!(!batch.is_noop());
        assert_eq!(batch.proof(), None);
    }
}

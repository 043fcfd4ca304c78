//! Durable command log adapter.
//!
//! Persists the command log under a per-replica directory: the latest
//! checkpoint in `checkpoint.bin`, rewritten through a temp file and an
//! atomic rename, and the batches recorded since it as length-prefixed
//! bincode frames appended to `batches.log`. The batch file is truncated
//! on every new checkpoint.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log::{MemoryLog, StateLog};
use crate::state::{Checkpoint, CommandBatch, DecisionProof, StateDescriptor};

const FRAME_HEADER_SIZE: u64 = 8; // 8 bytes for frame size
const CHECKPOINT_FILE: &str = "checkpoint.bin";
const CHECKPOINT_TMP_FILE: &str = "checkpoint.tmp";
const BATCH_FILE: &str = "batches.log";

#[derive(Serialize, Deserialize)]
struct BatchRecord {
    eid: u64,
    batch: CommandBatch,
}

/// Durable log adapter: a [`MemoryLog`] view backed by files.
pub struct DiskLog {
    view: MemoryLog,
    dir: PathBuf,
    batch_file: File,
    sync_log: bool,
    sync_ckp: bool,
}

impl DiskLog {
    /// Opens (or creates) the durable log under `dir`.
    ///
    /// A fresh directory is seeded with `snapshot`/`hash` as the slot-0
    /// checkpoint. An existing directory is recovered: the stored
    /// checkpoint is loaded and the batch file is scanned frame by frame,
    /// with a torn trailing frame truncated away. The second return value
    /// is the descriptor to replay on startup, present whenever the stored
    /// state reaches past slot 0.
    pub fn open(
        dir: PathBuf,
        snapshot: Vec<u8>,
        hash: Vec<u8>,
        sync_log: bool,
        sync_ckp: bool,
    ) -> Result<(Self, Option<StateDescriptor>)> {
        fs::create_dir_all(&dir)?;

        let ckp_path = dir.join(CHECKPOINT_FILE);
        let mut view = if ckp_path.exists() {
            let bytes = fs::read(&ckp_path)?;
            let checkpoint: Checkpoint = bincode::deserialize(&bytes)?;
            log::info!(
                "loaded durable checkpoint for eid {} from {:?}",
                checkpoint.eid,
                ckp_path
            );
            MemoryLog::with_checkpoint(checkpoint)
        } else {
            let view = MemoryLog::new(snapshot, hash);
            write_checkpoint_file(&dir, view.checkpoint(), sync_ckp)?;
            view
        };

        let mut batch_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(BATCH_FILE))?;

        let valid_len = replay_frames(&mut batch_file, &mut view)?;
        if valid_len < batch_file.metadata()?.len() {
            log::warn!(
                "truncating torn batch frame in {:?} at offset {}",
                dir.join(BATCH_FILE),
                valid_len
            );
            batch_file.set_len(valid_len)?;
        }
        batch_file.seek(SeekFrom::End(0))?;

        let recovered = if view.checkpoint_eid() > 0 || view.last_eid().is_some() {
            Some(stored_descriptor(&view))
        } else {
            None
        };

        let disk = DiskLog {
            view,
            dir,
            batch_file,
            sync_log,
            sync_ckp,
        };
        Ok((disk, recovered))
    }

    fn persist_checkpoint(&self) -> Result<()> {
        write_checkpoint_file(&self.dir, self.view.checkpoint(), self.sync_ckp)
    }

    fn append_frame(&mut self, eid: u64, batch: &CommandBatch) -> Result<()> {
        let record = BatchRecord {
            eid,
            batch: batch.clone(),
        };
        let frame = bincode::serialize(&record)?;
        self.batch_file.write_all(&(frame.len() as u64).to_le_bytes())?;
        self.batch_file.write_all(&frame)?;
        if self.sync_log {
            self.batch_file.sync_data()?;
        }
        Ok(())
    }

    fn reset_batch_file(&mut self) -> Result<()> {
        self.batch_file.set_len(0)?;
        self.batch_file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

impl StateLog for DiskLog {
    fn new_checkpoint(
        &mut self,
        snapshot: Vec<u8>,
        hash: Vec<u8>,
        eid: u64,
        proof: Option<DecisionProof>,
    ) -> Result<()> {
        self.view.new_checkpoint(snapshot, hash, eid, proof)?;
        self.persist_checkpoint()?;
        self.reset_batch_file()?;
        if self.sync_log {
            self.batch_file.sync_data()?;
        }
        Ok(())
    }

    fn append_batch(&mut self, eid: u64, batch: CommandBatch) -> Result<()> {
        let tail = self.view.last_eid().unwrap_or(self.view.checkpoint_eid());
        if eid <= tail {
            log::warn!("ignoring stale batch for eid {} (tail is {})", eid, tail);
            return Ok(());
        }
        self.append_frame(eid, &batch)?;
        self.view.append_batch(eid, batch)
    }

    fn build_descriptor(&self, eid: u64, include_snapshot: bool) -> StateDescriptor {
        self.view.build_descriptor(eid, include_snapshot)
    }

    fn install(&mut self, descriptor: &StateDescriptor) -> Result<()> {
        self.view.install(descriptor)?;
        self.persist_checkpoint()?;
        self.reset_batch_file()?;
        let batches: Vec<(u64, CommandBatch)> = self
            .view
            .batches()
            .iter()
            .map(|(eid, batch)| (*eid, batch.clone()))
            .collect();
        for (eid, batch) in &batches {
            self.append_frame(*eid, batch)?;
        }
        Ok(())
    }

    fn checkpoint_eid(&self) -> u64 {
        self.view.checkpoint_eid()
    }

    fn last_eid(&self) -> Option<u64> {
        self.view.last_eid()
    }
}

fn write_checkpoint_file(dir: &Path, checkpoint: &Checkpoint, sync_ckp: bool) -> Result<()> {
    let tmp_path = dir.join(CHECKPOINT_TMP_FILE);
    let bytes = bincode::serialize(checkpoint)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    if sync_ckp {
        file.sync_data()?;
    }
    drop(file);

    fs::rename(&tmp_path, dir.join(CHECKPOINT_FILE))?;
    Ok(())
}

/// Rebuilds the in-memory view from the batch file, returning the length
/// of the valid prefix. Scanning stops at the first incomplete or
/// undecodable frame.
fn replay_frames(file: &mut File, view: &mut MemoryLog) -> Result<u64> {
    let len = file.metadata()?.len();
    let mut pos = 0u64;
    file.seek(SeekFrom::Start(0))?;

    loop {
        if pos + FRAME_HEADER_SIZE > len {
            break;
        }
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let frame_len = u64::from_le_bytes(header);
        if pos + FRAME_HEADER_SIZE + frame_len > len {
            break;
        }

        let mut frame = vec![0u8; frame_len as usize];
        file.read_exact(&mut frame)?;
        let record: BatchRecord = match bincode::deserialize(&frame) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("discarding undecodable batch frame: {}", e);
                break;
            }
        };

        view.append_batch(record.eid, record.batch)?;
        pos += FRAME_HEADER_SIZE + frame_len;
    }

    Ok(pos)
}

/// Descriptor of the stored state for startup replay. Built directly from
/// the recovered view: locally persisted state is replayed even when no
/// proof was recorded, unlike state received from a peer.
fn stored_descriptor(view: &MemoryLog) -> StateDescriptor {
    let last_proof = match view.batches().values().last() {
        Some(batch) => batch.proof(),
        None => view.checkpoint().proof.clone(),
    };
    StateDescriptor {
        checkpoint: Some(view.checkpoint().clone()),
        batches: view.batches().clone(),
        last_proof,
        last_eid: Some(view.last_eid().unwrap_or(view.checkpoint_eid())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest;
    use crate::state::ExecutionContext;
    use tempfile::tempdir;

    fn proven_batch(eid: u64, command: &[u8]) -> CommandBatch {
        CommandBatch::new(
            vec![command.to_vec()],
            vec![ExecutionContext::new(eid, 0, true)
                .with_proof(DecisionProof(eid.to_le_bytes().to_vec()))],
        )
    }

    fn open_fresh(dir: PathBuf) -> (DiskLog, Option<StateDescriptor>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let snapshot = b"genesis".to_vec();
        let hash = digest(&snapshot);
        DiskLog::open(dir, snapshot, hash, true, true).unwrap()
    }

    #[test]
    fn test_fresh_open_has_no_stored_state() {
        let dir = tempdir().unwrap();
        let (disk, recovered) = open_fresh(dir.path().to_path_buf());
        assert!(recovered.is_none());
        assert_eq!(disk.checkpoint_eid(), 0);
        assert_eq!(disk.last_eid(), None);
    }

    #[test]
    fn test_batches_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let (mut disk, _) = open_fresh(dir.path().to_path_buf());
            disk.append_batch(1, proven_batch(1, b"a")).unwrap();
            disk.append_batch(2, proven_batch(2, b"b")).unwrap();
        }

        let (disk, recovered) = open_fresh(dir.path().to_path_buf());
        assert_eq!(disk.last_eid(), Some(2));

        let stored = recovered.unwrap();
        assert_eq!(stored.last_eid, Some(2));
        assert_eq!(stored.batches.len(), 2);
        assert_eq!(stored.batches[&1].commands[0], b"a".to_vec());
    }

    #[test]
    fn test_checkpoint_survives_reopen_and_drops_batches() {
        let dir = tempdir().unwrap();
        let snapshot = b"state@5".to_vec();
        let hash = digest(&snapshot);
        {
            let (mut disk, _) = open_fresh(dir.path().to_path_buf());
            disk.append_batch(1, proven_batch(1, b"a")).unwrap();
            disk.new_checkpoint(snapshot.clone(), hash.clone(), 5, Some(DecisionProof(vec![5])))
                .unwrap();
        }

        let (disk, recovered) = open_fresh(dir.path().to_path_buf());
        assert_eq!(disk.checkpoint_eid(), 5);
        assert_eq!(disk.last_eid(), None);

        let stored = recovered.unwrap();
        let ckp = stored.checkpoint.unwrap();
        assert_eq!(ckp.eid, 5);
        assert_eq!(ckp.snapshot, Some(snapshot));
        assert_eq!(ckp.hash, hash);
        assert!(stored.batches.is_empty());
    }

    #[test]
    fn test_torn_trailing_frame_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let (mut disk, _) = open_fresh(dir.path().to_path_buf());
            disk.append_batch(1, proven_batch(1, b"a")).unwrap();
        }

        // simulate a crash mid-append: a frame header promising more bytes
        // than were written
        let batch_path = dir.path().join(BATCH_FILE);
        let mut file = OpenOptions::new().append(true).open(&batch_path).unwrap();
        file.write_all(&1024u64.to_le_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let (disk, recovered) = open_fresh(dir.path().to_path_buf());
        assert_eq!(disk.last_eid(), Some(1));
        assert_eq!(recovered.unwrap().batches.len(), 1);

        // the torn bytes are gone from the file
        let len = fs::metadata(&batch_path).unwrap().len();
        let (mut disk2, _) = open_fresh(dir.path().to_path_buf());
        disk2.append_batch(2, proven_batch(2, b"b")).unwrap();
        assert!(fs::metadata(&batch_path).unwrap().len() > len);
        assert_eq!(disk2.last_eid(), Some(2));
    }

    #[test]
    fn test_install_rewrites_files() {
        let dir = tempdir().unwrap();
        let mut source = MemoryLog::new(b"genesis".to_vec(), digest(b"genesis"));
        source.append_batch(1, proven_batch(1, b"a")).unwrap();
        source.append_batch(2, proven_batch(2, b"b")).unwrap();
        let descriptor = source.build_descriptor(2, true);

        {
            let (mut disk, _) = open_fresh(dir.path().to_path_buf());
            disk.append_batch(1, proven_batch(1, b"stale")).unwrap();
            disk.install(&descriptor).unwrap();
            assert_eq!(disk.last_eid(), Some(2));
        }

        let (disk, recovered) = open_fresh(dir.path().to_path_buf());
        assert_eq!(disk.last_eid(), Some(2));
        let stored = recovered.unwrap();
        assert_eq!(stored.batches[&1].commands[0], b"a".to_vec());
        assert_eq!(stored.batches[&2].commands[0], b"b".to_vec());
    }
}

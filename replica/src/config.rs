//! Replica configuration.

use serde_derive::Deserialize;
use std::path::PathBuf;

use crate::error::{ReplicaError, Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Slots between checkpoints; must be greater than zero.
    pub checkpoint_period: u64,
    /// Whether batches and checkpoints are recorded at all.
    pub is_to_log: bool,
    /// Persist the command log to disk instead of keeping it in memory only.
    pub log_to_disk: bool,
    /// Synchronous batch persistence: flush file data on every append.
    pub sync_log: bool,
    /// Synchronous checkpoint persistence: flush before the checkpoint file
    /// is swapped into place.
    pub sync_ckp: bool,
    /// Identifies this replica's durable storage namespace.
    pub process_id: u32,
    /// Base directory for durable state.
    pub state_dir: PathBuf,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            checkpoint_period: 1024,
            is_to_log: true,
            log_to_disk: false,
            sync_log: false,
            sync_ckp: true,
            process_id: 0,
            state_dir: PathBuf::from("state"),
        }
    }
}

impl ReplicaConfig {
    pub fn from_toml(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ReplicaConfig = toml::from_str(&contents)
            .map_err(|e| ReplicaError::Config(format!("failed to parse {}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_period == 0 {
            return Err(ReplicaError::Config(
                "checkpoint_period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Durable storage directory for this replica.
    pub fn replica_dir(&self) -> PathBuf {
        self.state_dir.join(format!("replica_{}", self.process_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReplicaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkpoint_period, 1024);
        assert!(config.is_to_log);
        assert!(!config.log_to_disk);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = ReplicaConfig {
            checkpoint_period: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReplicaError::Config(_))));
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.toml");
        std::fs::write(
            &path,
            "checkpoint_period = 5\nlog_to_disk = true\nprocess_id = 3\n",
        )
        .unwrap();

        let config = ReplicaConfig::from_toml(path.to_str().unwrap()).unwrap();
        assert_eq!(config.checkpoint_period, 5);
        assert!(config.log_to_disk);
        assert_eq!(config.process_id, 3);
        // untouched fields keep their defaults
        assert!(config.sync_ckp);
        assert!(config.replica_dir().ends_with("replica_3"));
    }
}

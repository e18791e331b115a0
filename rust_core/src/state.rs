//! Durable relay state.
//!
//! One record holds every topic's last-published fingerprint and tracked
//! message id, plus revalidation metadata for the cached remote documents.
//! The whole record is rewritten on every save; persistence is always the
//! last step of a successful publish, so a failed save can at worst cause
//! one duplicate publish on the next cycle.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetch::CacheMeta;
use crate::models::Topic;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayState {
    #[serde(default)]
    pub last_hash_arbitration: Option<String>,
    #[serde(default)]
    pub last_hash_incursions: Option<String>,
    #[serde(default)]
    pub last_hash_invasions: Option<String>,
    #[serde(default)]
    pub last_hash_open_worlds: Option<String>,
    #[serde(default)]
    pub message_id_arbitration: Option<u64>,
    #[serde(default)]
    pub message_id_incursions: Option<u64>,
    #[serde(default)]
    pub message_id_invasions: Option<u64>,
    #[serde(default)]
    pub message_id_open_worlds: Option<u64>,
    #[serde(default)]
    pub arbitration_cache: CacheMeta,
    #[serde(default)]
    pub incursions_cache: CacheMeta,
    #[serde(default)]
    pub exports_cache: CacheMeta,
    #[serde(default)]
    pub dict_cache: CacheMeta,
}

impl RelayState {
    pub fn last_hash(&self, topic: Topic) -> Option<&str> {
        match topic {
            Topic::Arbitration => self.last_hash_arbitration.as_deref(),
            Topic::Incursions => self.last_hash_incursions.as_deref(),
            Topic::Invasions => self.last_hash_invasions.as_deref(),
            Topic::OpenWorldCycles => self.last_hash_open_worlds.as_deref(),
        }
    }

    pub fn message_id(&self, topic: Topic) -> Option<u64> {
        match topic {
            Topic::Arbitration => self.message_id_arbitration,
            Topic::Incursions => self.message_id_incursions,
            Topic::Invasions => self.message_id_invasions,
            Topic::OpenWorldCycles => self.message_id_open_worlds,
        }
    }

    /// Record a successful publish for `topic`.
    pub fn record_publish(&mut self, topic: Topic, hash: String, message_id: u64) {
        let (hash_slot, id_slot) = self.slot_mut(topic);
        *hash_slot = Some(hash);
        *id_slot = Some(message_id);
    }

    /// Forget a topic's tracked message and fingerprint, after a cleanup.
    pub fn clear_topic(&mut self, topic: Topic) {
        let (hash_slot, id_slot) = self.slot_mut(topic);
        *hash_slot = None;
        *id_slot = None;
    }

    fn slot_mut(&mut self, topic: Topic) -> (&mut Option<String>, &mut Option<u64>) {
        match topic {
            Topic::Arbitration => (
                &mut self.last_hash_arbitration,
                &mut self.message_id_arbitration,
            ),
            Topic::Incursions => (
                &mut self.last_hash_incursions,
                &mut self.message_id_incursions,
            ),
            Topic::Invasions => (
                &mut self.last_hash_invasions,
                &mut self.message_id_invasions,
            ),
            Topic::OpenWorldCycles => (
                &mut self.last_hash_open_worlds,
                &mut self.message_id_open_worlds,
            ),
        }
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted record. A missing file is a fresh start; a file
    /// that exists but does not parse is an error the operator must see.
    pub fn load(&self) -> Result<RelayState> {
        if !self.path.exists() {
            return Ok(RelayState::default());
        }
        let body = fs::read_to_string(&self.path)
            .with_context(|| format!("reading state file {}", self.path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("parsing state file {}", self.path.display()))
    }

    /// Serialize the entire record and replace the file atomically: write a
    /// sibling temp file, then rename it into place.
    pub fn save(&self, state: &RelayState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating state directory {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(state).context("serializing state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .with_context(|| format!("writing state temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        Ok(())
    }
}

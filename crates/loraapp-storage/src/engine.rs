//! Core storage engine: database lifecycle, tree access and id generation.
//!
//! [`StorageEngine::open`] opens the sled database and pre-creates every
//! tree, so a broken data directory surfaces at startup rather than on the
//! first request.

use std::path::Path;

use loraapp_types::{AppServerError, Result};

use crate::channels::{ChannelListStore, ChannelStore};
use crate::nodes::{NodeSessionStore, NodeStore};
use crate::queue::DownlinkQueueStore;

// ---------------------------------------------------------------------------
// Tree names
// ---------------------------------------------------------------------------

pub(crate) const CHANNEL_LISTS: &str = "channel_lists";
pub(crate) const CHANNELS: &str = "channels";
pub(crate) const NODES: &str = "nodes";
pub(crate) const NODE_SESSIONS: &str = "node_sessions";
pub(crate) const DOWNLINK_QUEUE: &str = "downlink_queue";

const TREES: [&str; 5] = [CHANNEL_LISTS, CHANNELS, NODES, NODE_SESSIONS, DOWNLINK_QUEUE];

// ---------------------------------------------------------------------------
// StorageEngine
// ---------------------------------------------------------------------------

/// Storage engine backed by sled.
///
/// # Trees
///
/// - `channel_lists`: channel list id → record
/// - `channels`: channel id → record
/// - `nodes`: DevEUI → record
/// - `node_sessions`: DevEUI → record
/// - `downlink_queue`: DevEUI ‖ item id → record
///
/// The engine is `Send + Sync`; services share it behind an `Arc`.
pub struct StorageEngine {
    db: sled::Db,
}

impl StorageEngine {
    /// Opens (or creates) the storage engine at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppServerError::StorageError`] if the database or any of
    /// its trees cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| AppServerError::StorageError {
            reason: format!("failed to open sled database '{}': {e}", path.display()),
        })?;
        Self::with_db(db)
    }

    /// Opens a throw-away database that is removed when dropped.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| AppServerError::StorageError {
                reason: format!("failed to open temporary sled database: {e}"),
            })?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        for name in TREES {
            db.open_tree(name).map_err(|e| AppServerError::StorageError {
                reason: format!("failed to open tree '{name}': {e}"),
            })?;
        }
        Ok(Self { db })
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| AppServerError::StorageError {
            reason: format!("failed to flush database: {e}"),
        })?;
        Ok(())
    }

    /// Returns a fresh, monotonically increasing id (never 0).
    pub(crate) fn next_id(&self) -> Result<i64> {
        let id = self
            .db
            .generate_id()
            .map_err(|e| AppServerError::StorageError {
                reason: format!("failed to generate id: {e}"),
            })?;
        Ok(id as i64 + 1)
    }

    /// Opens a named sled tree.
    pub(crate) fn open_tree(&self, name: &str) -> Result<sled::Tree> {
        self.db.open_tree(name).map_err(|e| AppServerError::StorageError {
            reason: format!("failed to open tree '{name}': {e}"),
        })
    }

    /// Returns a [`ChannelListStore`] for this engine.
    pub fn channel_lists(&self) -> Result<ChannelListStore<'_>> {
        ChannelListStore::new(self)
    }

    /// Returns a [`ChannelStore`] for this engine.
    pub fn channels(&self) -> Result<ChannelStore<'_>> {
        ChannelStore::new(self)
    }

    /// Returns a [`NodeStore`] for this engine.
    pub fn nodes(&self) -> Result<NodeStore<'_>> {
        NodeStore::new(self)
    }

    /// Returns a [`NodeSessionStore`] for this engine.
    pub fn node_sessions(&self) -> Result<NodeSessionStore<'_>> {
        NodeSessionStore::new(self)
    }

    /// Returns a [`DownlinkQueueStore`] for this engine.
    pub fn downlink_queue(&self) -> Result<DownlinkQueueStore<'_>> {
        DownlinkQueueStore::new(self)
    }
}

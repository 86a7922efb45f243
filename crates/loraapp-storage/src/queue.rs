//! Per-node downlink queue.
//!
//! Keys are `DevEUI ‖ id` (big-endian), so a prefix scan on the DevEUI
//! yields the queue in enqueue order.

use loraapp_types::{AppServerError, Eui64, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{StorageEngine, DOWNLINK_QUEUE};
use crate::json_tree::JsonTree;

/// Lowest application port usable for downlink payloads.
pub const MIN_F_PORT: u32 = 1;
/// Highest application port usable for downlink payloads.
pub const MAX_F_PORT: u32 = 223;

/// One queued downlink payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DownlinkQueueItemRecord {
    pub id: i64,
    pub dev_eui: Eui64,
    pub confirmed: bool,
    /// Set once a confirmed item has been handed out and awaits an ACK.
    pub pending: bool,
    pub f_port: u32,
    pub data: Vec<u8>,
}

/// Result of [`DownlinkQueueStore::next_for_delivery`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delivery {
    pub item: DownlinkQueueItemRecord,
    /// `true` when more items remain queued after this one.
    pub more_data: bool,
}

/// Downlink queue store.
pub struct DownlinkQueueStore<'a> {
    engine: &'a StorageEngine,
    tree: JsonTree<DownlinkQueueItemRecord>,
}

impl<'a> DownlinkQueueStore<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Result<Self> {
        Ok(Self {
            engine,
            tree: JsonTree::new(engine.open_tree(DOWNLINK_QUEUE)?),
        })
    }

    /// Appends a payload to the queue of an existing node. Returns the id.
    pub fn enqueue(&self, dev_eui: &Eui64, confirmed: bool, f_port: u32, data: Vec<u8>) -> Result<i64> {
        if !(MIN_F_PORT..=MAX_F_PORT).contains(&f_port) {
            return Err(AppServerError::InvalidArgument {
                reason: format!("fPort must be between {MIN_F_PORT} and {MAX_F_PORT}, got {f_port}"),
            });
        }
        if !self.engine.nodes()?.exists(dev_eui)? {
            return Err(AppServerError::NotFound {
                reason: format!("node {dev_eui} does not exist"),
            });
        }

        let id = self.engine.next_id()?;
        let item = DownlinkQueueItemRecord {
            id,
            dev_eui: *dev_eui,
            confirmed,
            pending: false,
            f_port,
            data,
        };
        self.tree.insert(&item_key(dev_eui, id), &item)?;
        tracing::debug!(dev_eui = %dev_eui, id, confirmed, "downlink enqueued");
        Ok(id)
    }

    /// Removes one item from a node's queue.
    pub fn delete(&self, dev_eui: &Eui64, id: i64) -> Result<()> {
        if !self.tree.delete(&item_key(dev_eui, id))? {
            return Err(AppServerError::NotFound {
                reason: format!("downlink queue item {id} of node {dev_eui} does not exist"),
            });
        }
        Ok(())
    }

    /// Returns a node's queue in enqueue order.
    pub fn list(&self, dev_eui: &Eui64) -> Result<Vec<DownlinkQueueItemRecord>> {
        self.tree.scan_prefix(dev_eui.as_bytes())
    }

    /// Hands out the next item for transmission.
    ///
    /// A pending (unacknowledged) confirmed item blocks the queue and is
    /// returned again. Otherwise the first item is taken: unconfirmed items
    /// are removed, confirmed items are marked pending. Returns `None` when
    /// the queue is empty or the head item exceeds `max_payload_size`.
    pub fn next_for_delivery(&self, dev_eui: &Eui64, max_payload_size: usize) -> Result<Option<Delivery>> {
        let items = self.list(dev_eui)?;
        let Some(head) = items.first() else {
            return Ok(None);
        };

        if head.data.len() > max_payload_size {
            tracing::warn!(
                dev_eui = %dev_eui,
                id = head.id,
                size = head.data.len(),
                max_payload_size,
                "downlink payload exceeds max payload size"
            );
            return Ok(None);
        }

        let mut item = head.clone();
        if item.confirmed {
            item.pending = true;
            self.tree.insert(&item_key(dev_eui, item.id), &item)?;
        } else {
            self.tree.delete(&item_key(dev_eui, item.id))?;
        }

        Ok(Some(Delivery {
            item,
            more_data: items.len() > 1,
        }))
    }

    /// Removes the pending item after the node acknowledged it.
    ///
    /// Returns the acknowledged item, or `None` when nothing was pending.
    pub fn acknowledge(&self, dev_eui: &Eui64) -> Result<Option<DownlinkQueueItemRecord>> {
        let pending = self.list(dev_eui)?.into_iter().find(|i| i.pending);
        if let Some(ref item) = pending {
            self.tree.delete(&item_key(dev_eui, item.id))?;
        }
        Ok(pending)
    }

    /// Removes a node's whole queue. Returns the number of removed items.
    pub fn clear(&self, dev_eui: &Eui64) -> Result<usize> {
        self.tree.delete_prefix(dev_eui.as_bytes())
    }
}

fn item_key(dev_eui: &Eui64, id: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(dev_eui.as_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

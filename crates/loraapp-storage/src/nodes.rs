//! Nodes and their activation sessions, both keyed by DevEUI.

use loraapp_types::{AesKey, AppServerError, DevAddr, Eui64, Result, RxWindow};
use serde::{Deserialize, Serialize};

use crate::engine::{StorageEngine, NODES, NODE_SESSIONS};
use crate::json_tree::JsonTree;
use crate::Page;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A provisioned end device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    pub app_key: AesKey,
    pub name: String,
    pub rx_window: RxWindow,
    pub rx_delay: u32,
    pub rx1_dr_offset: i32,
    pub rx2_dr: u32,
    /// `None` when the node uses no extra channels.
    pub channel_list_id: Option<i64>,
    pub is_abp: bool,
    pub is_class_c: bool,
    pub relax_fcnt: bool,
}

/// Session state of an activated node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeSessionRecord {
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    pub dev_addr: DevAddr,
    pub app_s_key: AesKey,
    pub nwk_s_key: AesKey,
    pub f_cnt_up: u32,
    pub f_cnt_down: u32,
    pub rx_delay: u32,
    pub rx1_dr_offset: i32,
    pub rx_window: RxWindow,
    pub rx2_dr: u32,
    pub relax_fcnt: bool,
}

// ---------------------------------------------------------------------------
// NodeStore
// ---------------------------------------------------------------------------

/// Node store.
pub struct NodeStore<'a> {
    engine: &'a StorageEngine,
    tree: JsonTree<NodeRecord>,
}

impl<'a> NodeStore<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Result<Self> {
        Ok(Self {
            engine,
            tree: JsonTree::new(engine.open_tree(NODES)?),
        })
    }

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// - [`AppServerError::AlreadyExists`] if the DevEUI is taken.
    /// - [`AppServerError::NotFound`] if the referenced channel list is
    ///   missing.
    pub fn create(&self, record: &NodeRecord) -> Result<()> {
        self.validate(record)?;
        if !self.tree.insert_new(record.dev_eui.as_bytes(), record)? {
            return Err(AppServerError::AlreadyExists {
                reason: format!("node {} already exists", record.dev_eui),
            });
        }
        Ok(())
    }

    /// Returns the node with the given DevEUI.
    pub fn get(&self, dev_eui: &Eui64) -> Result<NodeRecord> {
        self.tree
            .get(dev_eui.as_bytes())?
            .ok_or_else(|| node_not_found(dev_eui))
    }

    /// Returns `true` if the node exists.
    pub fn exists(&self, dev_eui: &Eui64) -> Result<bool> {
        self.tree.contains(dev_eui.as_bytes())
    }

    /// Replaces an existing node.
    pub fn update(&self, record: &NodeRecord) -> Result<()> {
        self.get(&record.dev_eui)?;
        self.validate(record)?;
        self.tree.insert(record.dev_eui.as_bytes(), record)
    }

    /// Deletes a node, its session and its downlink queue.
    pub fn delete(&self, dev_eui: &Eui64) -> Result<()> {
        if !self.tree.delete(dev_eui.as_bytes())? {
            return Err(node_not_found(dev_eui));
        }
        let session_removed = self.engine.node_sessions()?.remove(dev_eui)?;
        let queue_removed = self.engine.downlink_queue()?.clear(dev_eui)?;
        tracing::debug!(
            dev_eui = %dev_eui,
            session_removed,
            queue_removed,
            "deleted node"
        );
        Ok(())
    }

    /// Returns the total count and one page of nodes, ordered by DevEUI.
    pub fn list(&self, page: Page) -> Result<(usize, Vec<NodeRecord>)> {
        let total = self.tree.len();
        let records = self.tree.page(page.offset, page.limit)?;
        Ok((total, records))
    }

    fn validate(&self, record: &NodeRecord) -> Result<()> {
        if let Some(list_id) = record.channel_list_id {
            if !self.engine.channel_lists()?.exists(list_id)? {
                return Err(AppServerError::NotFound {
                    reason: format!("channel list {list_id} does not exist"),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NodeSessionStore
// ---------------------------------------------------------------------------

/// Node session store.
pub struct NodeSessionStore<'a> {
    engine: &'a StorageEngine,
    tree: JsonTree<NodeSessionRecord>,
}

impl<'a> NodeSessionStore<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Result<Self> {
        Ok(Self {
            engine,
            tree: JsonTree::new(engine.open_tree(NODE_SESSIONS)?),
        })
    }

    /// Creates the session of an existing node.
    pub fn create(&self, record: &NodeSessionRecord) -> Result<()> {
        self.require_node(&record.dev_eui)?;
        if !self.tree.insert_new(record.dev_eui.as_bytes(), record)? {
            return Err(AppServerError::AlreadyExists {
                reason: format!("node session for {} already exists", record.dev_eui),
            });
        }
        Ok(())
    }

    /// Returns the session of the given node.
    pub fn get(&self, dev_eui: &Eui64) -> Result<NodeSessionRecord> {
        self.tree
            .get(dev_eui.as_bytes())?
            .ok_or_else(|| session_not_found(dev_eui))
    }

    /// Replaces an existing session.
    pub fn update(&self, record: &NodeSessionRecord) -> Result<()> {
        self.get(&record.dev_eui)?;
        self.tree.insert(record.dev_eui.as_bytes(), record)
    }

    /// Deletes the session of the given node.
    pub fn delete(&self, dev_eui: &Eui64) -> Result<()> {
        if !self.remove(dev_eui)? {
            return Err(session_not_found(dev_eui));
        }
        Ok(())
    }

    /// Returns `true` if any session uses `dev_addr`.
    pub fn dev_addr_in_use(&self, dev_addr: &DevAddr) -> Result<bool> {
        Ok(self
            .tree
            .values()?
            .iter()
            .any(|s| &s.dev_addr == dev_addr))
    }

    pub(crate) fn remove(&self, dev_eui: &Eui64) -> Result<bool> {
        self.tree.delete(dev_eui.as_bytes())
    }

    fn require_node(&self, dev_eui: &Eui64) -> Result<()> {
        if !self.engine.nodes()?.exists(dev_eui)? {
            return Err(node_not_found(dev_eui));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn node_not_found(dev_eui: &Eui64) -> AppServerError {
    AppServerError::NotFound {
        reason: format!("node {dev_eui} does not exist"),
    }
}

fn session_not_found(dev_eui: &Eui64) -> AppServerError {
    AppServerError::NotFound {
        reason: format!("node session for {dev_eui} does not exist"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

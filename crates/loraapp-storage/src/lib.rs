//! Storage layer for the LoRa application server.
//!
//! A single sled database holds one tree per entity. Values are stored as
//! JSON through [`json_tree::JsonTree`]. The RPC services are the only
//! callers; the schema is private to this crate.
//!
//! # Modules
//!
//! - [`engine`]: `StorageEngine` (database lifecycle, id generation).
//! - [`channels`]: channel lists and their channels.
//! - [`nodes`]: nodes and node sessions.
//! - [`queue`]: per-node downlink queue.

pub mod channels;
pub mod engine;
pub mod json_tree;
pub mod nodes;
pub mod queue;

pub use channels::{ChannelListRecord, ChannelRecord};
pub use engine::StorageEngine;
pub use nodes::{NodeRecord, NodeSessionRecord};
pub use queue::DownlinkQueueItemRecord;

/// Pagination window for list operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Page {
    /// Maximum number of records returned.
    pub limit: usize,
    /// Number of records skipped.
    pub offset: usize,
}

impl Page {
    /// Default page size when the caller passes no (or a non-positive) limit.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Builds a page from the signed values carried by list requests.
    pub fn from_request(limit: i64, offset: i64) -> Self {
        let limit = if limit <= 0 {
            Self::DEFAULT_LIMIT
        } else {
            limit as usize
        };
        Self {
            limit,
            offset: offset.max(0) as usize,
        }
    }
}

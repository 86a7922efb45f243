//! Channel lists and the channels they contain.

use loraapp_types::{AppServerError, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{StorageEngine, CHANNELS, CHANNEL_LISTS};
use crate::json_tree::JsonTree;
use crate::Page;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A named set of extra uplink channels.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelListRecord {
    /// Storage-assigned id.
    pub id: i64,
    /// Display name.
    pub name: String,
}

/// One channel (index + frequency) of a channel list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Storage-assigned id.
    pub id: i64,
    /// Owning channel list.
    pub channel_list_id: i64,
    /// Channel index.
    pub channel: i32,
    /// Frequency in Hz.
    pub frequency: i32,
}

// ---------------------------------------------------------------------------
// ChannelListStore
// ---------------------------------------------------------------------------

/// Channel list store.
pub struct ChannelListStore<'a> {
    engine: &'a StorageEngine,
    tree: JsonTree<ChannelListRecord>,
}

impl<'a> ChannelListStore<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Result<Self> {
        Ok(Self {
            engine,
            tree: JsonTree::new(engine.open_tree(CHANNEL_LISTS)?),
        })
    }

    /// Creates a channel list and returns its id.
    pub fn create(&self, name: &str) -> Result<i64> {
        validate_name(name)?;
        let id = self.engine.next_id()?;
        self.tree.insert(
            &id.to_be_bytes(),
            &ChannelListRecord {
                id,
                name: name.to_string(),
            },
        )?;
        Ok(id)
    }

    /// Returns the channel list with the given id.
    pub fn get(&self, id: i64) -> Result<ChannelListRecord> {
        self.tree
            .get(&id.to_be_bytes())?
            .ok_or_else(|| not_found(id))
    }

    /// Returns `true` if a channel list with this id exists.
    pub fn exists(&self, id: i64) -> Result<bool> {
        self.tree.contains(&id.to_be_bytes())
    }

    /// Renames an existing channel list.
    pub fn update(&self, id: i64, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut record = self.get(id)?;
        record.name = name.to_string();
        self.tree.insert(&id.to_be_bytes(), &record)
    }

    /// Deletes a channel list together with its channels.
    pub fn delete(&self, id: i64) -> Result<()> {
        if !self.tree.delete(&id.to_be_bytes())? {
            return Err(not_found(id));
        }
        let removed = self.engine.channels()?.delete_by_channel_list(id)?;
        tracing::debug!(channel_list_id = id, removed, "deleted channel list");
        Ok(())
    }

    /// Returns the total count and one page of channel lists.
    pub fn list(&self, page: Page) -> Result<(usize, Vec<ChannelListRecord>)> {
        let total = self.tree.len();
        let records = self.tree.page(page.offset, page.limit)?;
        Ok((total, records))
    }
}

// ---------------------------------------------------------------------------
// ChannelStore
// ---------------------------------------------------------------------------

/// Channel store.
pub struct ChannelStore<'a> {
    engine: &'a StorageEngine,
    tree: JsonTree<ChannelRecord>,
}

impl<'a> ChannelStore<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Result<Self> {
        Ok(Self {
            engine,
            tree: JsonTree::new(engine.open_tree(CHANNELS)?),
        })
    }

    /// Creates a channel on an existing channel list and returns its id.
    pub fn create(&self, channel_list_id: i64, channel: i32, frequency: i32) -> Result<i64> {
        self.validate(channel_list_id, channel, frequency)?;
        let id = self.engine.next_id()?;
        self.tree.insert(
            &id.to_be_bytes(),
            &ChannelRecord {
                id,
                channel_list_id,
                channel,
                frequency,
            },
        )?;
        Ok(id)
    }

    /// Returns the channel with the given id.
    pub fn get(&self, id: i64) -> Result<ChannelRecord> {
        self.tree
            .get(&id.to_be_bytes())?
            .ok_or_else(|| AppServerError::NotFound {
                reason: format!("channel {id} does not exist"),
            })
    }

    /// Replaces an existing channel.
    pub fn update(&self, record: &ChannelRecord) -> Result<()> {
        self.get(record.id)?;
        self.validate(record.channel_list_id, record.channel, record.frequency)?;
        self.tree.insert(&record.id.to_be_bytes(), record)
    }

    /// Deletes a channel.
    pub fn delete(&self, id: i64) -> Result<()> {
        if !self.tree.delete(&id.to_be_bytes())? {
            return Err(AppServerError::NotFound {
                reason: format!("channel {id} does not exist"),
            });
        }
        Ok(())
    }

    /// Returns the channels of a channel list, ordered by channel index.
    pub fn list_by_channel_list(&self, channel_list_id: i64) -> Result<Vec<ChannelRecord>> {
        if !self.engine.channel_lists()?.exists(channel_list_id)? {
            return Err(not_found(channel_list_id));
        }
        let mut channels: Vec<ChannelRecord> = self
            .tree
            .values()?
            .into_iter()
            .filter(|c| c.channel_list_id == channel_list_id)
            .collect();
        channels.sort_by_key(|c| c.channel);
        Ok(channels)
    }

    pub(crate) fn delete_by_channel_list(&self, channel_list_id: i64) -> Result<usize> {
        let mut removed = 0;
        for channel in self.tree.values()? {
            if channel.channel_list_id == channel_list_id
                && self.tree.delete(&channel.id.to_be_bytes())?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn validate(&self, channel_list_id: i64, channel: i32, frequency: i32) -> Result<()> {
        if channel < 0 {
            return Err(AppServerError::InvalidArgument {
                reason: format!("channel index must not be negative, got {channel}"),
            });
        }
        if frequency <= 0 {
            return Err(AppServerError::InvalidArgument {
                reason: format!("frequency must be positive, got {frequency}"),
            });
        }
        if !self.engine.channel_lists()?.exists(channel_list_id)? {
            return Err(not_found(channel_list_id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppServerError::InvalidArgument {
            reason: "channel list name must not be empty".into(),
        });
    }
    Ok(())
}

fn not_found(id: i64) -> AppServerError {
    AppServerError::NotFound {
        reason: format!("channel list {id} does not exist"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_update_channel_list() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let engine = StorageEngine::open_temporary()?;
        let lists = engine.channel_lists()?;

        let id = lists.create("EU extra")?;
        assert_eq!(lists.get(id)?.name, "EU extra");

        lists.update(id, "EU868 extra")?;
        assert_eq!(lists.get(id)?.name, "EU868 extra");
        Ok(())
    }

    #[test]
    fn empty_name_is_rejected() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let engine = StorageEngine::open_temporary()?;
        let result = engine.channel_lists()?.create("  ");
        assert!(matches!(result, Err(AppServerError::InvalidArgument { .. })));
        Ok(())
    }

    #[test]
    fn list_paginates_in_id_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let engine = StorageEngine::open_temporary()?;
        let lists = engine.channel_lists()?;
        for name in ["a", "b", "c"] {
            lists.create(name)?;
        }

        let (total, page) = lists.list(Page { limit: 2, offset: 1 })?;
        assert_eq!(total, 3);
        let names: Vec<_> = page.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        Ok(())
    }

    #[test]
    fn channel_requires_existing_list() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let engine = StorageEngine::open_temporary()?;
        let result = engine.channels()?.create(42, 3, 867_100_000);
        assert!(matches!(result, Err(AppServerError::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn deleting_list_removes_its_channels() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let engine = StorageEngine::open_temporary()?;
        let list_id = engine.channel_lists()?.create("extra")?;
        let other_id = engine.channel_lists()?.create("other")?;
        let channels = engine.channels()?;
        let a = channels.create(list_id, 4, 867_300_000)?;
        channels.create(list_id, 3, 867_100_000)?;
        let kept = channels.create(other_id, 3, 868_100_000)?;

        let listed = channels.list_by_channel_list(list_id)?;
        assert_eq!(listed.iter().map(|c| c.channel).collect::<Vec<_>>(), vec![3, 4]);

        engine.channel_lists()?.delete(list_id)?;
        assert!(matches!(
            channels.get(a),
            Err(AppServerError::NotFound { .. })
        ));
        assert_eq!(channels.get(kept)?.channel_list_id, other_id);
        Ok(())
    }
}

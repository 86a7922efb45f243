//! Typed sled tree wrapper.
//!
//! [`JsonTree<T>`] serializes values to JSON on write and deserializes on
//! read. Keys are raw bytes chosen by the caller; numeric ids are stored
//! big-endian so that iteration order matches id order.

use std::marker::PhantomData;

use loraapp_types::{AppServerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A sled tree whose values are JSON-encoded `T`.
pub struct JsonTree<T> {
    tree: sled::Tree,
    _marker: PhantomData<T>,
}

impl<T> JsonTree<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Wraps an open sled tree.
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree,
            _marker: PhantomData,
        }
    }

    /// Retrieves a value by key. Returns `Ok(None)` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<T>> {
        let raw = self.tree.get(key).map_err(|e| AppServerError::StorageError {
            reason: format!("sled get failed: {e}"),
        })?;

        match raw {
            None => Ok(None),
            Some(bytes) => decode(&bytes).map(Some),
        }
    }

    /// Returns `true` if the key exists.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| AppServerError::StorageError {
                reason: format!("sled contains_key failed: {e}"),
            })
    }

    /// Serializes and inserts a value, replacing any previous one.
    pub fn insert(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| AppServerError::StorageError {
            reason: format!("failed to encode record: {e}"),
        })?;
        self.tree
            .insert(key, bytes)
            .map_err(|e| AppServerError::StorageError {
                reason: format!("sled insert failed: {e}"),
            })?;
        Ok(())
    }

    /// Inserts a value only if the key is absent.
    ///
    /// Returns `Ok(false)` without writing when the key already exists.
    pub fn insert_new(&self, key: &[u8], value: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(value).map_err(|e| AppServerError::StorageError {
            reason: format!("failed to encode record: {e}"),
        })?;
        let swapped = self
            .tree
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))
            .map_err(|e| AppServerError::StorageError {
                reason: format!("sled compare_and_swap failed: {e}"),
            })?;
        Ok(swapped.is_ok())
    }

    /// Removes a key. Returns `Ok(true)` if it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let prev = self.tree.remove(key).map_err(|e| AppServerError::StorageError {
            reason: format!("sled remove failed: {e}"),
        })?;
        Ok(prev.is_some())
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns up to `limit` values after skipping `offset`, in key order.
    pub fn page(&self, offset: usize, limit: usize) -> Result<Vec<T>> {
        let mut results = Vec::new();
        for item in self.tree.iter().skip(offset).take(limit) {
            let (_, value) = item.map_err(|e| AppServerError::StorageError {
                reason: format!("sled iter failed: {e}"),
            })?;
            results.push(decode(&value)?);
        }
        Ok(results)
    }

    /// Returns every value, in key order.
    pub fn values(&self) -> Result<Vec<T>> {
        self.scan_prefix(&[])
    }

    /// Returns every value whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut results = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (_, value) = item.map_err(|e| AppServerError::StorageError {
                reason: format!("sled scan_prefix failed: {e}"),
            })?;
            results.push(decode(&value)?);
        }
        Ok(results)
    }

    /// Removes every key starting with `prefix`. Returns the number removed.
    pub fn delete_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let mut removed = 0;
        for item in self.tree.scan_prefix(prefix).keys() {
            let key = item.map_err(|e| AppServerError::StorageError {
                reason: format!("sled scan_prefix failed: {e}"),
            })?;
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| AppServerError::StorageError {
        reason: format!("stored record is malformed: {e}"),
    })
}

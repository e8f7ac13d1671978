//! Storage for ciphertext produced ahead of a sync exchange.

use {
    anyhow::{Context as _, Result},
    parking_lot::Mutex,
    std::{collections::HashMap, path::Path},
};

/// Holds staged envelopes by `(doc_id, rev)`.
pub trait StagingStore: Send + Sync {
    fn put(&self, doc_id: &str, rev: &str, envelope: &str) -> Result<()>;
    fn get(&self, doc_id: &str, rev: &str) -> Result<Option<String>>;
    fn delete(&self, doc_id: &str, rev: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStaging {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStaging {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StagingStore for MemoryStaging {
    #[inline]
    fn put(&self, doc_id: &str, rev: &str, envelope: &str) -> Result<()> {
        self.entries
            .lock()
            .insert((doc_id.to_owned(), rev.to_owned()), envelope.to_owned());
        Ok(())
    }

    #[inline]
    fn get(&self, doc_id: &str, rev: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .get(&(doc_id.to_owned(), rev.to_owned()))
            .cloned())
    }

    #[inline]
    fn delete(&self, doc_id: &str, rev: &str) -> Result<()> {
        self.entries
            .lock()
            .remove(&(doc_id.to_owned(), rev.to_owned()));
        Ok(())
    }
}

/// Staging store persisted in a sled tree, so staged ciphertext survives restarts.
#[derive(Debug, Clone)]
pub struct SledStaging {
    tree: sled::Tree,
}

const TREE_NAME: &str = "staged_envelopes";

impl SledStaging {
    #[inline]
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("failed to open {path:?}"))?;
        Self::from_db(&db)
    }

    #[inline]
    pub fn from_db(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(TREE_NAME)?,
        })
    }

    /// Big-endian length of `doc_id`, then `doc_id`, then `rev`.
    fn key(doc_id: &str, rev: &str) -> Result<Vec<u8>> {
        let doc_id_len = u64::try_from(doc_id.len())?;
        let mut key = Vec::with_capacity(
            doc_id
                .len()
                .saturating_add(rev.len())
                .saturating_add(size_of::<u64>()),
        );
        key.extend_from_slice(&doc_id_len.to_be_bytes());
        key.extend_from_slice(doc_id.as_bytes());
        key.extend_from_slice(rev.as_bytes());
        Ok(key)
    }
}

impl StagingStore for SledStaging {
    #[inline]
    fn put(&self, doc_id: &str, rev: &str, envelope: &str) -> Result<()> {
        self.tree
            .insert(Self::key(doc_id, rev)?, envelope.as_bytes())?;
        Ok(())
    }

    #[inline]
    fn get(&self, doc_id: &str, rev: &str) -> Result<Option<String>> {
        self.tree
            .get(Self::key(doc_id, rev)?)?
            .map(|value| String::from_utf8(value.to_vec()).context("invalid staged envelope"))
            .transpose()
    }

    #[inline]
    fn delete(&self, doc_id: &str, rev: &str) -> Result<()> {
        self.tree.remove(Self::key(doc_id, rev)?)?;
        Ok(())
    }
}

use {cadd::ops::Cadd, std::collections::BTreeMap, thiserror::Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("index {0} was already released")]
    Released(u64),
    #[error("index {0} is already buffered")]
    Duplicate(u64),
}

/// Releases items in index order, starting at 1, regardless of insertion order.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    #[inline]
    fn default() -> Self {
        Self {
            next: 1,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> ReorderBuffer<T> {
    /// Index of the next item to be released.
    #[must_use]
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.next
    }

    #[must_use]
    #[inline]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn insert(&mut self, index: u64, item: T) -> Result<(), ReorderError> {
        if index < self.next {
            return Err(ReorderError::Released(index));
        }
        if self.pending.contains_key(&index) {
            return Err(ReorderError::Duplicate(index));
        }
        self.pending.insert(index, item);
        Ok(())
    }

    /// Removes the item with the next expected index, if it is buffered.
    #[inline]
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let entry = self.pending.first_entry()?;
        if *entry.key() != self.next {
            return None;
        }
        let next = self.next.cadd(1_u64).ok()?;
        let item = entry.remove();
        let index = self.next;
        self.next = next;
        Some((index, item))
    }

    #[inline]
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

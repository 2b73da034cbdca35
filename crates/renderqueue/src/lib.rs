use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("render queue is full ({capacity} pending jobs)")]
    Full { capacity: usize },
}

/// FIFO of pending render jobs keyed by instance.
///
/// A key is queued at most once; enqueueing a key that is already pending keeps
/// its original position. Removing a key drops the pending job without
/// disturbing the order of the rest.
#[derive(Debug, Clone)]
pub struct RenderQueue<K> {
    order: VecDeque<K>,
    pending: HashSet<K>,
    capacity: Option<usize>,
}

impl<K> Default for RenderQueue<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> RenderQueue<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            pending: HashSet::new(),
            capacity: None,
        }
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            pending: HashSet::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Queues `key`. Returns `Ok(false)` when the key was already pending.
    pub fn enqueue(&mut self, key: K) -> Result<bool, QueueError> {
        if self.pending.contains(&key) {
            return Ok(false);
        }
        if let Some(capacity) = self.capacity {
            if self.order.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }
        self.pending.insert(key.clone());
        self.order.push_back(key);
        Ok(true)
    }

    pub fn remove(&mut self, key: &K) -> bool {
        if !self.pending.remove(key) {
            return false;
        }
        self.order.retain(|queued| queued != key);
        true
    }

    pub fn pop_next(&mut self) -> Option<K> {
        let key = self.order.pop_front()?;
        self.pending.remove(&key);
        Some(key)
    }

    /// Takes up to `limit` jobs from the front of the queue.
    pub fn drain_batch(&mut self, limit: usize) -> Vec<K> {
        let mut batch = Vec::with_capacity(limit.min(self.order.len()));
        while batch.len() < limit {
            match self.pop_next() {
                Some(key) => batch.push(key),
                None => break,
            }
        }
        batch
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}

// src/store/ring.rs

//! Fixed-capacity history buffer.

use std::collections::VecDeque;

/// Ring buffer that keeps the `capacity` most recently pushed items.
///
/// Pushing into a full ring evicts the oldest item and returns it. A ring
/// with capacity `0` keeps nothing: every push is immediately evicted.
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `item`, returning whatever was evicted to make room.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Change the capacity, dropping the oldest items if it shrinks.
    pub fn resize(&mut self, capacity: usize) {
        while self.items.len() > capacity {
            self.items.pop_front();
        }
        self.capacity = capacity;
    }

    /// Most recently pushed item.
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Items from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> HistoryRing<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

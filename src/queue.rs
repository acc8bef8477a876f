use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::track::TrackRef;

/// Result of a shuffle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleOutcome {
    Shuffled(usize),
    NothingToShuffle,
}

/// Ordered queue of unresolved track references.
///
/// Every operation takes the same guard for the duration of the in-memory
/// mutation and nothing else, so enqueue, pop, shuffle and clear are fully
/// serialized. The guard is a std mutex: it cannot be held across an
/// `.await` inside a spawned task.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: Mutex<VecDeque<TrackRef>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TrackRef>> {
        // A panic mid-push leaves the deque itself intact
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a batch, keeping its order. Returns the new queue length.
    pub fn enqueue(&self, tracks: impl IntoIterator<Item = TrackRef>) -> usize {
        let mut items = self.lock();
        items.extend(tracks);
        items.len()
    }

    /// Remove and return the oldest reference; `None` when empty
    pub fn pop_front(&self) -> Option<TrackRef> {
        self.lock().pop_front()
    }

    pub fn shuffle(&self) -> ShuffleOutcome {
        self.shuffle_with(&mut rand::thread_rng())
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&self, rng: &mut R) -> ShuffleOutcome {
        let mut items = self.lock();
        if items.is_empty() {
            return ShuffleOutcome::NothingToShuffle;
        }
        items.make_contiguous().shuffle(rng);
        ShuffleOutcome::Shuffled(items.len())
    }

    /// Empty the queue, returning how many references were dropped
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let removed = items.len();
        items.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the first `limit` references, for listings
    pub fn snapshot(&self, limit: usize) -> Vec<TrackRef> {
        self.lock().iter().take(limit).cloned().collect()
    }
}

//! Bounded entropy queue shared between the sampler thread and the server
//!
//! A single mutex guards the samples. It is held for exactly one push or pop
//! and never across network I/O. The length is mirrored into an atomic so the
//! server can report it without contending with the sampler.

use crate::sample::RandomSample;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Thread-safe FIFO of random samples with drop-oldest overflow
///
/// # Design
///
/// - `parking_lot::Mutex` around a `VecDeque`, cloned handles share one queue
/// - `push` never blocks on space and never fails: the oldest sample is evicted
/// - `pop` on an empty queue returns [`RandomSample::INVALID`]
/// - `size` is a lock-free, possibly stale read for informational reporting
#[derive(Clone)]
pub struct EntropyQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    samples: Mutex<QueueState>,
    len: AtomicUsize,
    capacity: usize,
}

struct QueueState {
    samples: VecDeque<RandomSample>,
    stats: QueueStats,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total_pushes: u64,
    pub total_pops: u64,
    pub empty_pops: u64,
    pub evictions_overflow: u64,
    pub last_push: Option<DateTime<Utc>>,
}

impl EntropyQueue {
    /// Create a new queue holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                samples: Mutex::new(QueueState {
                    samples: VecDeque::with_capacity(capacity),
                    stats: QueueStats::default(),
                }),
                len: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Append a sample, evicting the oldest one when the queue is full
    pub fn push(&self, sample: RandomSample) {
        let mut state = self.inner.samples.lock();

        if state.samples.len() >= self.inner.capacity {
            state.samples.pop_front();
            state.stats.evictions_overflow += 1;
        }
        if self.inner.capacity > 0 {
            state.samples.push_back(sample);
        }

        state.stats.total_pushes += 1;
        state.stats.last_push = Some(Utc::now());
        self.inner.len.store(state.samples.len(), Ordering::Release);
    }

    /// Remove and return the oldest sample
    ///
    /// Returns [`RandomSample::INVALID`] and leaves the queue untouched when empty.
    pub fn pop(&self) -> RandomSample {
        let mut state = self.inner.samples.lock();

        match state.samples.pop_front() {
            Some(sample) => {
                state.stats.total_pops += 1;
                self.inner.len.store(state.samples.len(), Ordering::Release);
                sample
            }
            None => {
                state.stats.empty_pops += 1;
                RandomSample::INVALID
            }
        }
    }

    /// Current number of queued samples, read without taking the lock
    pub fn size(&self) -> usize {
        self.inner.len.load(Ordering::Acquire)
    }

    /// Check if queue is empty (best-effort, see [`EntropyQueue::size`])
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Maximum number of samples held
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        self.inner.samples.lock().stats.clone()
    }

    /// Copy the queued samples in FIFO order without consuming them
    pub fn snapshot(&self) -> Vec<RandomSample> {
        self.inner.samples.lock().samples.iter().copied().collect()
    }
}

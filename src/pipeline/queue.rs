//! Bounded multi-priority ingestion queue with deduplication.
//!
//! Four FIFO bands (URGENT..LOW). A path appears at most once across all
//! bands; re-enqueueing promotes it to the stronger priority and ORs the
//! force flag. A dequeued path stays in the dedup set until the final stage
//! calls `mark_done`, which is what gives at-most-one-in-pipeline per path.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::{Condvar, Mutex};

use crate::types::{Priority, QueueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Deduplicated,
    /// Queue at capacity; the item was not accepted.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberState {
    Queued(Priority),
    InFlight,
}

struct Inner {
    bands: [VecDeque<QueueItem>; Priority::COUNT],
    members: HashMap<String, MemberState>,
    paused: bool,
    closed: bool,
}

pub struct IngestQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    capacity: usize,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bands: Default::default(),
                members: HashMap::new(),
                paused: false,
                closed: false,
            }),
            cond: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn enqueue(&self, path: &str, priority: Priority, force: bool) -> EnqueueOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return EnqueueOutcome::Full;
        }

        match inner.members.get(path).copied() {
            Some(MemberState::InFlight) => EnqueueOutcome::Deduplicated,
            Some(MemberState::Queued(existing)) => {
                let effective = existing.min(priority);
                if effective != existing {
                    // promote: move the queued item to the tail of the
                    // stronger band, keeping force if either asked for it
                    let band = &mut inner.bands[existing.index()];
                    if let Some(pos) = band.iter().position(|i| i.path == path) {
                        let mut item = band.remove(pos).unwrap();
                        item.priority = effective;
                        item.force |= force;
                        inner.bands[effective.index()].push_back(item);
                        inner.members.insert(path.to_string(), MemberState::Queued(effective));
                    }
                } else if force {
                    let band = &mut inner.bands[existing.index()];
                    if let Some(item) = band.iter_mut().find(|i| i.path == path) {
                        item.force = true;
                    }
                }
                EnqueueOutcome::Deduplicated
            }
            None => {
                let queued: usize = inner.bands.iter().map(|b| b.len()).sum();
                if queued >= self.capacity {
                    return EnqueueOutcome::Full;
                }
                inner.bands[priority.index()].push_back(QueueItem {
                    path: path.to_string(),
                    priority,
                    force,
                    enqueued_at: Utc::now(),
                });
                inner
                    .members
                    .insert(path.to_string(), MemberState::Queued(priority));
                self.cond.notify_one();
                EnqueueOutcome::Enqueued
            }
        }
    }

    /// Oldest item of the highest non-empty band. Blocks while empty or
    /// paused; returns None once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        loop {
            let empty = inner.bands.iter().all(|b| b.is_empty());
            if empty {
                if inner.closed {
                    return None;
                }
                self.cond.wait(&mut inner);
                continue;
            }
            // paused suspends consumption; a closing queue still drains
            if inner.paused && !inner.closed {
                self.cond.wait(&mut inner);
                continue;
            }

            for band in 0..Priority::COUNT {
                if let Some(item) = inner.bands[band].pop_front() {
                    inner
                        .members
                        .insert(item.path.clone(), MemberState::InFlight);
                    return Some(item);
                }
            }
        }
    }

    /// Release a path from the dedup set once its job has committed or been
    /// dropped.
    pub fn mark_done(&self, path: &str) {
        self.inner.lock().members.remove(path);
    }

    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.paused = false;
        drop(inner);
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Empty every band and the queued part of the dedup set atomically.
    /// In-flight paths stay tracked until their `mark_done`.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed: usize = inner.bands.iter().map(|b| b.len()).sum();
        for band in &mut inner.bands {
            band.clear();
        }
        inner
            .members
            .retain(|_, state| *state == MemberState::InFlight);
        removed
    }

    /// Stop accepting new items and wake all consumers; dequeue drains what
    /// is left and then returns None.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().bands.iter().map(|b| b.len()).sum()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().members.contains_key(path)
    }

    /// Per-band queue lengths, URGENT first.
    pub fn band_sizes(&self) -> [usize; Priority::COUNT] {
        let inner = self.inner.lock();
        std::array::from_fn(|i| inner.bands[i].len())
    }
}

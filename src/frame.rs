//! Encoded frame cache.
//!
//! This module provides:
//! - `Frame`: an immutable, JPEG-encoded frame with capture metadata.
//! - `FrameBuffer`: a freshness-bounded single-slot cache plus a small
//!   bounded queue with drop-oldest eviction.
//!
//! The buffer has exactly one producer (the owning stream's capture loop)
//! and arbitrarily many consumers. Publication is O(1), never blocks, and
//! consumers never observe a partially written frame: the slot holds an
//! `Arc<Frame>` swapped under a short critical section.
//!
//! A frame whose age exceeds the freshness threshold is reported as absent
//! by `latest()`, even though the payload stays cached internally. Status
//! queries can still read the raw age through `last_frame_age()`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Default capacity of the secondary queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

/// Default maximum age before a cached frame is treated as unavailable.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(30);

/// An encoded video frame. Immutable once published.
#[derive(Debug)]
pub struct Frame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time, seconds since epoch.
    pub captured_epoch_s: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        let captured_epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            jpeg,
            width,
            height,
            captured_epoch_s,
            captured_at: Instant::now(),
        }
    }

    /// Encoded JPEG payload.
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    /// Age of this frame relative to its capture instant.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Freshness-bounded single-slot cache with a bounded secondary queue.
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    freshness: Duration,
}

struct Inner {
    latest: Option<Arc<Frame>>,
    queue: VecDeque<Arc<Frame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_QUEUE_CAPACITY, DEFAULT_FRESHNESS)
    }

    pub fn with_settings(capacity: usize, freshness: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest: None,
                queue: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
            freshness,
        }
    }

    /// Publish a frame: replace the latest slot and enqueue with drop-oldest
    /// eviction. Never blocks on consumers.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let mut inner = self.lock();
        inner.latest = Some(frame.clone());
        while inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
        }
        inner.queue.push_back(frame);
    }

    /// The most recent frame, or `None` when nothing has been published or
    /// the cached frame is older than the freshness threshold.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let inner = self.lock();
        let frame = inner.latest.as_ref()?;
        if frame.age() > self.freshness {
            return None;
        }
        Some(frame.clone())
    }

    /// Pop the oldest queued frame. Used by consumers that want successive
    /// frames rather than the latest snapshot.
    pub fn pop_queued(&self) -> Option<Arc<Frame>> {
        self.lock().queue.pop_front()
    }

    /// Age of the cached frame regardless of freshness, for status reporting.
    pub fn last_frame_age(&self) -> Option<Duration> {
        self.lock().latest.as_ref().map(|f| f.age())
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a reader panicked mid-access; the slot
        // always holds complete frames, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

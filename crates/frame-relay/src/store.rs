use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use peek_proto::Frame;

/// Number of frames the relay keeps.
pub const FRAME_STORE_CAPACITY: usize = 1000;

/// Append-only ring of the most recent frames, oldest evicted first.
/// Every operation takes the same lock, so a clear never interleaves with a
/// read and a read always returns a consistent copy.
#[derive(Debug)]
pub struct BoundedFrameStore {
    capacity: usize,
    frames: Mutex<VecDeque<Frame>>,
    appended: AtomicU64,
}

impl Default for BoundedFrameStore {
    fn default() -> Self {
        Self::with_capacity(FRAME_STORE_CAPACITY)
    }
}

impl BoundedFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            appended: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds `frame` at the tail and returns how many frames were evicted.
    pub fn append(&self, frame: Frame) -> usize {
        let mut frames = self.frames.lock();
        frames.push_back(frame);
        self.appended.fetch_add(1, Ordering::Relaxed);
        let mut evicted = 0;
        while frames.len() > self.capacity {
            frames.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            counter!("poker_peek_store_evicted_total", evicted as u64);
        }
        gauge!("poker_peek_store_frames", frames.len() as f64);
        evicted
    }

    pub fn read_all(&self) -> Vec<Frame> {
        self.frames.lock().iter().cloned().collect()
    }

    /// Empties the store and returns how many frames were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let cleared = frames.len();
        frames.clear();
        gauge!("poker_peek_store_frames", 0.0);
        cleared
    }

    /// Frames appended since creation, including evicted and cleared ones.
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

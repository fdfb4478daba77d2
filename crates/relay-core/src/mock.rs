//! In-memory [`PeerSink`] for tests and benchmarks.
//!
//! Records every frame it is sent, can be closed to simulate a disconnect,
//! and can be given a capacity to simulate a full outbound buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::connection::{PeerSink, SendError};
use crate::protocol::messages::ServerNotice;

/// A [`PeerSink`] that stores frames in memory.
pub struct MockSink {
    frames: Mutex<Vec<String>>,
    open: AtomicBool,
    capacity: Option<usize>,
}

impl MockSink {
    /// Creates an open, unbounded sink.
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            capacity: None,
        }
    }

    /// Creates an open sink that reports [`SendError::Full`] once it holds
    /// `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Simulates the connection going away.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Returns a copy of every frame received so far.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().expect("lock poisoned").clone()
    }

    /// Removes and returns every frame received so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock().expect("lock poisoned"))
    }

    /// Frames that parse as relay notices, in order.  Forwarded client
    /// traffic is skipped.
    pub fn notices(&self) -> Vec<ServerNotice> {
        self.frames()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSink for MockSink {
    fn send(&self, frame: String) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        let mut frames = self.frames.lock().expect("lock poisoned");
        if self.capacity.is_some_and(|cap| frames.len() >= cap) {
            return Err(SendError::Full);
        }
        frames.push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

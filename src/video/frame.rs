use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use image::RgbImage;

/// A captured image plus where it sits in the capture sequence.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: Instant,
    /// Strictly increasing across the life of a slot, including restarts.
    pub sequence: u64,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<Frame>>,
    next_sequence: u64,
    closed: bool,
}

impl SlotState {
    fn has_newer(&self, after: Option<u64>) -> bool {
        match (&self.latest, after) {
            (Some(frame), Some(seen)) => frame.sequence > seen,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Single-slot latest-frame buffer. The capture loop overwrites it; readers
/// never queue up behind each other or behind the writer.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replaces the held frame and wakes every waiting reader.
    pub fn publish(&self, image: RgbImage, captured_at: Instant) -> Arc<Frame> {
        let mut state = self.lock();
        let frame = Arc::new(Frame {
            image,
            captured_at,
            sequence: state.next_sequence,
        });
        state.next_sequence += 1;
        state.latest = Some(frame.clone());
        state.closed = false;
        drop(state);
        self.ready.notify_all();
        frame
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().latest.clone()
    }

    /// Waits up to `timeout` for a frame newer than `after` (any frame when
    /// `after` is `None`). Returns `None` on timeout or once the slot closes.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration) -> Option<Arc<Frame>> {
        let state = self.lock();
        let (state, _) = match self
            .ready
            .wait_timeout_while(state, timeout, |s| !s.closed && !s.has_newer(after))
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.has_newer(after) {
            state.latest.clone()
        } else {
            None
        }
    }

    /// The producer is gone: drop the held frame and release every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.latest = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

// crates/scale-vision-pipeline/src/buffer.rs
//
// Bounded, time-windowed FIFO between the ingestion runner (sole producer)
// and the control pipeline (sole consumer). One mutex + one condvar.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use scale_vision_core::config::BufferConfig;
use scale_vision_core::types::Frame;

use crate::clock::unix_now;

struct Inner {
    queue: VecDeque<Frame>,
    drops: u64,
}

pub struct FrameBuffer {
    inner:       Mutex<Inner>,
    not_empty:   Condvar,
    max_ms:      u64,
    max_frames:  usize,
    drop_oldest: bool,
}

impl FrameBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            inner:       Mutex::new(Inner { queue: VecDeque::new(), drops: 0 }),
            not_empty:   Condvar::new(),
            max_ms:      config.max_ms,
            max_frames:  config.max_frames,
            drop_oldest: config.drop_policy == "drop_oldest",
        }
    }

    /// Insert at the tail. Head elements older than `max_ms` relative to the
    /// incoming frame's timestamp are evicted first; a full buffer then
    /// either evicts the head (`drop_oldest`) or discards the new frame.
    /// Every discarded frame bumps the monotone `drops` counter.
    pub fn put(&self, frame: Frame) {
        let mut inner = self.inner.lock().unwrap();
        let now = frame.timestamp;
        while inner
            .queue
            .front()
            .is_some_and(|head| (now - head.timestamp) * 1000.0 > self.max_ms as f64)
        {
            inner.queue.pop_front();
            inner.drops += 1;
        }
        if inner.queue.len() >= self.max_frames {
            if self.drop_oldest {
                inner.queue.pop_front();
                inner.drops += 1;
            } else {
                inner.drops += 1;
                return;
            }
        }
        inner.queue.push_back(frame);
        self.not_empty.notify_one();
    }

    /// Blocks up to `timeout` for a frame; `None` on timeout.
    pub fn get(&self, timeout: Duration) -> Option<Frame> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _timed_out) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |inner| inner.queue.is_empty())
            .unwrap();
        inner.queue.pop_front()
    }

    /// Age of the head frame in milliseconds, 0 when empty.
    pub fn queue_ms(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.queue.front() {
            Some(head) => ((unix_now() - head.timestamp) * 1000.0).max(0.0),
            None => 0.0,
        }
    }

    pub fn drops(&self) -> u64 {
        self.inner.lock().unwrap().drops
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

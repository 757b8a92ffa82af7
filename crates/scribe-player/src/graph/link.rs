//! Bounded sample queues forming the edges of the pipeline graph.
//!
//! Every connection between two stages is a [`StageLink`] carrying
//! interleaved `f32` samples:
//!
//! - decode thread → staging link (the decoder's output port)
//! - chain thread → output link
//! - sink callback drains the output link (non-blocking)
//!
//! Links are bounded to cap memory and latency, support `close()` for
//! deterministic shutdown, and `flush()` for flushing seeks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// The `done` flag lives under the same mutex as the buffer so producers
/// and consumers observe close/drain transitions without races. The
/// channel count is fixed for the lifetime of the link.
pub struct StageLink {
    channels: usize,
    max_samples: usize,
    inner: Mutex<LinkInner>,
    cv: Condvar,
}

struct LinkInner {
    buf: VecDeque<f32>,
    closed: bool,
}

/// Capacity in samples for `seconds` of audio at `rate_hz`/`channels`.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl StageLink {
    /// Create a bounded link. `max_samples` is a cap in samples, not
    /// frames; use [`capacity_for`] to size it in seconds.
    pub fn new(channels: usize, max_samples: usize) -> Self {
        Self {
            channels,
            max_samples: max_samples.max(channels),
            inner: Mutex::new(LinkInner {
                buf: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Channel count of the interleaved stream carried by this link.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.buf.len() / self.channels
    }

    /// Whether the producer has closed the link. A closed link may still
    /// hold samples until drained.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Closed and fully drained: nothing more will ever come out.
    pub fn is_drained(&self) -> bool {
        let g = self.inner.lock().unwrap();
        g.closed && g.buf.is_empty()
    }

    /// Mark the link finished and wake all waiters. Idempotent.
    ///
    /// Blocked pushes return early and drop their samples; blocked pops
    /// return `None` once the buffer drains.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Discard all buffered samples, keeping the link open.
    ///
    /// Used by flushing seeks: stale audio decoded before the seek must
    /// not reach the sink.
    pub fn flush(&self) {
        let mut g = self.inner.lock().unwrap();
        g.buf.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the link is full.
    ///
    /// Returns early (dropping the remainder) if the link is closed
    /// while waiting.
    pub fn push_blocking(&self, samples: &[f32]) {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.buf.len() >= self.max_samples && !g.closed {
                g = self.cv.wait(g).unwrap();
            }
            if g.closed {
                return;
            }

            let mut pushed_any = false;
            while offset < samples.len() && g.buf.len() < self.max_samples {
                g.buf.push_back(samples[offset]);
                offset += 1;
                pushed_any = true;
            }

            drop(g);
            if pushed_any {
                self.cv.notify_all();
            }
        }
    }

    /// Like [`Self::push_blocking`], but gives up as soon as `keep`
    /// turns false. Returns `true` when every sample was pushed.
    ///
    /// The chain worker uses this so a flushing seek can abort a push
    /// that is blocked on a full link; the flush's wakeup doubles as the
    /// re-check point.
    pub fn push_while(&self, samples: &[f32], keep: impl Fn() -> bool) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.buf.len() >= self.max_samples && !g.closed {
                if !keep() {
                    return false;
                }
                g = self.cv.wait(g).unwrap();
            }
            if g.closed || !keep() {
                return false;
            }

            let mut pushed_any = false;
            while offset < samples.len() && g.buf.len() < self.max_samples {
                g.buf.push_back(samples[offset]);
                offset += 1;
                pushed_any = true;
            }

            drop(g);
            if pushed_any {
                self.cv.notify_all();
            }
        }
        true
    }

    /// Block until exactly `frames` whole frames are available and pop
    /// them. Returns `None` if the link closes before enough data.
    pub fn pop_exact(&self, frames: usize) -> Option<Vec<f32>> {
        let want = frames * self.channels;
        let mut g = self.inner.lock().unwrap();

        while g.buf.len() < want && !g.closed {
            g = self.cv.wait(g).unwrap();
        }
        if g.buf.len() < want {
            return None;
        }

        let out: Vec<f32> = g.buf.drain(..want).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until at least one frame is available, then pop up to
    /// `max_frames`. Returns `None` once the link is closed and empty.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        while g.buf.is_empty() && !g.closed {
            g = self.cv.wait(g).unwrap();
        }
        if g.buf.is_empty() {
            return None;
        }

        let take = (g.buf.len() / self.channels).min(max_frames) * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.buf.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Pop up to `max_frames` without blocking; `None` when empty.
    pub fn try_pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        let take = (g.buf.len() / self.channels).min(max_frames) * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.buf.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }
}

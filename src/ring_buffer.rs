//! Per-input-device, multi-channel, single-writer/multi-reader circular
//! buffer in frames (spec §3 "Ring buffer state", §4.1 "Ring Buffer").
//!
//! One writer (the owning Input Tap's hardware callback) and N readers (each
//! Output Unit's hardware render callback) share this structure. The
//! critical section guarding cursors and the channel arrays is short,
//! bounded, and allocation-free, so a non-fair spin-style lock is
//! appropriate here (spec §4.1 "Concurrency"; spec §9 design note).
//! [`parking_lot::Mutex`] is used for exactly that reason — grounded on
//! `poodle64-thoth`'s use of `parking_lot` for short audio-adjacent
//! critical sections.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Result of [`RingBuffer::begin_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    /// Absolute (possibly overrun-corrected) cursor the read starts at.
    pub start: i64,
    /// Frames actually available, `<= requested`.
    pub available: usize,
    /// `available < requested`.
    pub underrun: bool,
    /// The writer lapped this reader; its cursor was jumped to `write - K`.
    pub overrun: bool,
}

struct Inner {
    channels: Vec<Vec<f32>>,
    write: i64,
    readers: HashMap<String, i64>,
}

/// A fixed-capacity, multi-channel ring buffer indexed by a monotonic frame
/// cursor modulo capacity (spec GLOSSARY).
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RingBuffer {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        assert!(channel_count > 0, "ring buffer needs at least one channel");
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                channels: vec![vec![0.0_f32; capacity]; channel_count],
                write: 0,
                readers: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Registers `id` as a reader. Idempotent. A newly registered reader is
    /// positioned at `max(0, write - capacity * PREROLL_FRACTION)` so a
    /// freshly attached output gets pre-roll instead of an immediate
    /// underrun (spec §4.1 "Registration policy").
    pub fn register_reader(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner.readers.contains_key(id) {
            return;
        }
        let preroll = (self.capacity as f64 * crate::config::PREROLL_FRACTION) as i64;
        let cursor = (inner.write - preroll).max(0);
        inner.readers.insert(id.to_string(), cursor);
    }

    /// Drops every registered reader not present in `keep`.
    pub fn prune_readers(&self, keep: &std::collections::HashSet<String>) {
        let mut inner = self.inner.lock();
        inner.readers.retain(|id, _| keep.contains(id));
    }

    pub fn is_reader_registered(&self, id: &str) -> bool {
        self.inner.lock().readers.contains_key(id)
    }

    /// Writes `frames` samples per channel from non-interleaved source
    /// buffers, one slice per channel. If `frames` exceeds capacity, the
    /// earliest `frames - capacity` frames are dropped; the write cursor
    /// still advances by the full `frames`, so readers observe the same
    /// timeline the hardware saw (spec §4.1 "Write").
    pub fn write(&self, channel_buffers: &[&[f32]], frames: usize) {
        let mut inner = self.inner.lock();
        let channel_count = inner.channels.len();
        assert_eq!(
            channel_buffers.len(),
            channel_count,
            "write() channel count mismatch"
        );
        let cap = self.capacity;
        let to_write = frames.min(cap);
        let skip = frames - to_write;
        let start = (inner.write).rem_euclid(cap as i64) as usize;
        for ch in 0..channel_count {
            let src = &channel_buffers[ch][skip..skip + to_write];
            let dst = &mut inner.channels[ch];
            let first_len = to_write.min(cap - start);
            dst[start..start + first_len].copy_from_slice(&src[..first_len]);
            let remaining = to_write - first_len;
            if remaining > 0 {
                dst[..remaining].copy_from_slice(&src[first_len..]);
            }
        }
        inner.write += frames as i64;
    }

    /// Begins a read of up to `frames` frames for reader `id`. Returns a
    /// window the caller may pass to [`Self::read_channel`] once per
    /// channel and must close with [`Self::end_read`] (spec §4.1 "Read").
    pub fn begin_read(&self, id: &str, frames: usize) -> ReadWindow {
        let mut inner = self.inner.lock();
        let write = inner.write;
        let Some(cursor) = inner.readers.get_mut(id) else {
            return ReadWindow {
                start: write,
                available: 0,
                underrun: frames > 0,
                overrun: false,
            };
        };
        let cap = self.capacity as i64;
        let mut overrun = false;
        if write - *cursor > cap {
            *cursor = write - cap;
            overrun = true;
        }
        let available = (write - *cursor).max(0) as usize;
        let available = available.min(frames);
        let underrun = available < frames;
        ReadWindow {
            start: *cursor,
            available,
            underrun,
            overrun,
        }
    }

    /// Copies `frames` samples of `channel` starting at absolute cursor
    /// `start` into `dest`. May be called once per channel for the same
    /// `(start, frames)` window, preserving stereo alignment across calls.
    pub fn read_channel(&self, start: i64, frames: usize, channel: usize, dest: &mut [f32]) {
        if frames == 0 {
            return;
        }
        let inner = self.inner.lock();
        let cap = self.capacity;
        let src = &inner.channels[channel];
        let start_idx = start.rem_euclid(cap as i64) as usize;
        let first_len = frames.min(cap - start_idx);
        dest[..first_len].copy_from_slice(&src[start_idx..start_idx + first_len]);
        let remaining = frames - first_len;
        if remaining > 0 {
            dest[first_len..first_len + remaining].copy_from_slice(&src[..remaining]);
        }
    }

    /// Advances reader `id`'s cursor by exactly `frames` (must be `<=` the
    /// `available` returned by the matching [`Self::begin_read`]).
    pub fn end_read(&self, id: &str, frames: usize) {
        let mut inner = self.inner.lock();
        if let Some(cursor) = inner.readers.get_mut(id) {
            *cursor += frames as i64;
        }
    }

    /// Fraction of capacity currently buffered ahead of `id`'s cursor, in
    /// `[0, 1]`.
    pub fn fill_ratio(&self, id: &str) -> f32 {
        let inner = self.inner.lock();
        let Some(cursor) = inner.readers.get(id) else {
            return 0.0;
        };
        let filled = (inner.write - cursor).max(0) as f32;
        (filled / self.capacity as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_registered_at_zero_when_write_is_zero() {
        let rb = RingBuffer::new(2, 16);
        rb.register_reader("out1");
        let w = rb.begin_read("out1", 4);
        assert_eq!(w.start, 0);
        assert_eq!(w.available, 0);
        assert!(w.underrun);
    }

    #[test]
    fn register_reader_is_idempotent() {
        let rb = RingBuffer::new(1, 16);
        let ch = [1.0_f32; 8];
        rb.write(&[&ch], 8);
        rb.register_reader("out1");
        let first = rb.begin_read("out1", 1);
        rb.register_reader("out1");
        let second = rb.begin_read("out1", 1);
        assert_eq!(first.start, second.start);
    }

    #[test]
    fn preroll_is_half_capacity_behind_write() {
        let rb = RingBuffer::new(1, 16);
        let ch = [1.0_f32; 16];
        rb.write(&[&ch], 16);
        rb.register_reader("out1");
        let w = rb.begin_read("out1", 1);
        assert_eq!(w.start, 8);
    }

    #[test]
    fn write_past_capacity_keeps_last_k_frames_and_advances_cursor_by_full_count() {
        let rb = RingBuffer::new(1, 4);
        rb.register_reader("r");
        let data: Vec<f32> = (0..6).map(|i| i as f32).collect();
        rb.write(&[&data], 6);
        {
            let inner = rb.inner.lock();
            assert_eq!(inner.write, 6);
        }
        let w = rb.begin_read("r", 4);
        assert_eq!(w.available, 4);
        let mut dest = [0.0_f32; 4];
        rb.read_channel(w.start, 4, 0, &mut dest);
        // last 4 of [0,1,2,3,4,5] => [2,3,4,5]
        assert_eq!(dest, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn overrun_jumps_reader_to_write_minus_capacity() {
        let rb = RingBuffer::new(1, 4);
        rb.register_reader("r");
        let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
        rb.write(&[&data], 10);
        let w = rb.begin_read("r", 4);
        assert!(w.overrun);
        assert_eq!(w.start, 6); // write(10) - capacity(4)
        assert_eq!(w.available, 4);
    }

    #[test]
    fn underrun_when_fewer_frames_available_than_requested() {
        let rb = RingBuffer::new(1, 16);
        rb.register_reader("r");
        let data = [1.0_f32; 3];
        rb.write(&[&data], 3);
        let w = rb.begin_read("r", 8);
        assert!(w.underrun);
        assert_eq!(w.available, 3);
    }

    #[test]
    fn write_read_round_trip_preserves_samples() {
        let rb = RingBuffer::new(2, 32);
        rb.register_reader("r");
        let left: Vec<f32> = (0..8).map(|i| i as f32 * 0.1).collect();
        let right: Vec<f32> = (0..8).map(|i| -(i as f32) * 0.1).collect();
        rb.write(&[&left, &right], 8);
        let w = rb.begin_read("r", 8);
        assert_eq!(w.available, 8);
        let mut dl = [0.0_f32; 8];
        let mut dr = [0.0_f32; 8];
        rb.read_channel(w.start, 8, 0, &mut dl);
        rb.read_channel(w.start, 8, 1, &mut dr);
        assert_eq!(dl.to_vec(), left);
        assert_eq!(dr.to_vec(), right);
        rb.end_read("r", w.available);
        assert_eq!(rb.fill_ratio("r"), 0.0);
    }

    #[test]
    fn prune_readers_drops_unlisted_ids() {
        let rb = RingBuffer::new(1, 16);
        rb.register_reader("a");
        rb.register_reader("b");
        let keep: std::collections::HashSet<String> = ["a".to_string()].into_iter().collect();
        rb.prune_readers(&keep);
        assert!(rb.is_reader_registered("a"));
        assert!(!rb.is_reader_registered("b"));
    }

    #[test]
    fn invariant_write_minus_read_never_exceeds_capacity() {
        let rb = RingBuffer::new(1, 8);
        rb.register_reader("r");
        for _ in 0..20 {
            let chunk = [0.0_f32; 3];
            rb.write(&[&chunk], 3);
            let w = rb.begin_read("r", 3);
            rb.end_read("r", w.available);
            let inner = rb.inner.lock();
            let cursor = inner.readers["r"];
            assert!(inner.write - cursor <= 8);
        }
    }
}

//! Input Tap: owns one hardware input stream and the ring buffer it feeds
//! (spec §3 "Input Tap", §4.2 "Input Tap").
//!
//! The hardware callback closure captures only the [`RingBuffer`] handle and
//! writes into it directly — no allocation, no locking beyond the ring
//! buffer's own short critical section (spec §4.2 "Concurrency"). Grounded
//! on the teacher's `hw_worker.rs` callback discipline ("never allocate,
//! never block") and `poodle64-thoth`'s `audio/capture.rs`, which drives a
//! `cpal` input stream with a closure that only writes into a ring buffer.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config;
use crate::device::{AudioInputStream, HostAudioApi, StreamConfig};
use crate::error::EngineError;
use crate::ring_buffer::RingBuffer;

pub struct InputTap {
    uid: String,
    channel_count: usize,
    ring: Arc<RingBuffer>,
    stream: Option<Box<dyn AudioInputStream>>,
}

impl InputTap {
    /// Builds a tap for `uid` without starting hardware I/O. Ring capacity
    /// follows spec §3: `max(RING_CAPACITY_MULTIPLIER * buffer_frames,
    /// RING_CAPACITY_FLOOR)`.
    pub fn new(uid: String, channel_count: usize, buffer_frames: u32) -> Self {
        let capacity = (config::RING_CAPACITY_MULTIPLIER * buffer_frames as usize)
            .max(config::RING_CAPACITY_FLOOR);
        Self {
            uid,
            channel_count,
            ring: Arc::new(RingBuffer::new(channel_count, capacity)),
            stream: None,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn ring(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    pub fn register_reader(&self, output_uid: &str) {
        self.ring.register_reader(output_uid);
    }

    pub fn prune_readers(&self, keep: &HashSet<String>) {
        self.ring.prune_readers(keep);
    }

    /// Opens the hardware stream and starts writing captured frames into the
    /// ring buffer. Idempotent: calling `start` while already started is a
    /// no-op (spec §4.2 "Start").
    pub fn start(
        &mut self,
        host: &dyn HostAudioApi,
        sample_rate: u32,
        buffer_frames: u32,
    ) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let config = StreamConfig {
            sample_rate,
            buffer_frames,
            channels: self.channel_count,
        };
        let ring = Arc::clone(&self.ring);
        let uid = self.uid.clone();
        let stream = host.open_input_stream(
            &self.uid,
            config,
            Box::new(move |channels, frames| {
                if channels.len() != ring.channel_count() {
                    warn!(device = %uid, "input callback channel count mismatch, dropping block");
                    return;
                }
                ring.write(channels, frames);
            }),
        )?;
        self.stream = Some(stream);
        debug!(device = %self.uid, "input tap started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!(device = %self.uid, "input tap stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for InputTap {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tap_computes_capacity_from_buffer_frames() {
        let tap = InputTap::new("in-1".into(), 2, 64);
        assert_eq!(tap.ring().capacity(), config::RING_CAPACITY_FLOOR);
    }

    #[test]
    fn new_tap_uses_multiplier_when_it_exceeds_floor() {
        let tap = InputTap::new("in-1".into(), 2, 512);
        assert_eq!(
            tap.ring().capacity(),
            config::RING_CAPACITY_MULTIPLIER * 512
        );
    }

    #[test]
    fn not_running_until_started() {
        let tap = InputTap::new("in-1".into(), 1, 256);
        assert!(!tap.is_running());
    }
}

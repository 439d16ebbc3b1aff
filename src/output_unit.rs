//! Output Unit: owns one hardware output stream and pulls a fully mixed
//! block from the engine on every hardware render callback (spec §3
//! "Output Unit", §4.3 "Output Unit").
//!
//! Grounded on the teacher's `hw_worker.rs` playback path: the realtime
//! callback thread never touches the route table directly, it only calls
//! back into a shared render entry point that already holds everything it
//! needs (here, [`crate::engine::Engine::render_output`]).

use std::sync::Weak;

use tracing::debug;

use crate::device::{AudioOutputStream, HostAudioApi, StreamConfig};
use crate::engine::Engine;
use crate::error::EngineError;

pub struct OutputUnit {
    uid: String,
    channel_count: usize,
    stream: Option<Box<dyn AudioOutputStream>>,
}

impl OutputUnit {
    pub fn new(uid: String, channel_count: usize) -> Self {
        Self {
            uid,
            channel_count,
            stream: None,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Opens the hardware stream. `engine` is held weakly: if the engine is
    /// torn down while the hardware callback is mid-flight, the callback
    /// silently renders zero instead of dereferencing a dangling engine
    /// (spec §4.3 "Concurrency").
    pub fn start(
        &mut self,
        host: &dyn HostAudioApi,
        engine: Weak<Engine>,
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
        let uid = self.uid.clone();
        let stream = host.open_output_stream(
            &self.uid,
            config,
            Box::new(move |channels, frames| {
                let Some(engine) = engine.upgrade() else {
                    for ch in channels.iter_mut() {
                        ch[..frames].fill(0.0);
                    }
                    return;
                };
                engine.render_output(&uid, channels, frames);
            }),
        )?;
        self.stream = Some(stream);
        debug!(device = %self.uid, "output unit started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!(device = %self.uid, "output unit stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for OutputUnit {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Host audio API contract (spec §6 "Host audio API contract (consumed)").
//!
//! The core never talks to an OS audio API directly; it talks to
//! [`HostAudioApi`] and the stream handles it returns. This mirrors the
//! teacher's split between `hw::traits::HwDevice` ("what the device is")
//! and `HwWorkerDriver` ("what the running stream does") — one trait pair
//! instead of five per-OS modules, since every concrete backend here is the
//! same `cpal` device underneath.

use crate::error::EngineError;

/// Identity and capability of a device, as reported by the host audio API
/// (spec §3 "Device descriptor"). UIDs are unique within one snapshot of
/// the device list.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub uid: String,
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub supported_sample_rates: Vec<u32>,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

impl DeviceDescriptor {
    pub fn supports_sample_rate(&self, rate: u32) -> bool {
        self.supported_sample_rates.iter().any(|&r| r == rate)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultDevices {
    pub input_uid: Option<String>,
    pub output_uid: Option<String>,
}

/// Non-interleaved 32-bit float stream configuration negotiated for one
/// device (spec §4.2/§4.3 "Start").
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub channels: usize,
}

/// A running hardware input stream. On each hardware callback the owner
/// (an [`crate::input_tap::InputTap`]) receives non-interleaved `f32`
/// frames through the closure passed to [`HostAudioApi::open_input_stream`];
/// this handle only needs to outlive the stream and stop it on drop/`stop`.
pub trait AudioInputStream: Send {
    fn stop(&mut self);
}

/// A running hardware output stream, pull-style: the host calls the render
/// closure passed to [`HostAudioApi::open_output_stream`] whenever it needs
/// more frames.
pub trait AudioOutputStream: Send {
    fn stop(&mut self);
}

/// The host audio API this engine requires (spec §6). `cpal` is a
/// stream-config API rather than a persistent-device-property API, so
/// `set_sample_rate`/`set_buffer_frames` here validate against what the
/// device supports and cache the negotiated config for the next
/// `open_*_stream` call, instead of mutating already-open hardware state
/// the way CoreAudio/ALSA property setters do.
pub trait HostAudioApi: Send + Sync {
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    fn default_devices(&self) -> DefaultDevices;

    fn device(&self, uid: &str) -> Option<DeviceDescriptor> {
        self.list_devices().into_iter().find(|d| d.uid == uid)
    }

    /// Validates and negotiates the nominal sample rate for `uid`. Returns
    /// the actual rate the hardware will run at.
    fn set_sample_rate(&self, uid: &str, rate: u32) -> Result<u32, EngineError>;

    /// Validates and negotiates the buffer frame size for `uid`. Returns
    /// the actual buffer size the hardware will run at.
    fn set_buffer_frames(&self, uid: &str, frames: u32) -> Result<u32, EngineError>;

    /// Opens a push-style input stream: `on_data` is invoked on the
    /// hardware callback thread with one `&[f32]` slice per channel and the
    /// frame count captured.
    fn open_input_stream(
        &self,
        uid: &str,
        config: StreamConfig,
        on_data: Box<dyn FnMut(&[&[f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioInputStream>, EngineError>;

    /// Opens a pull-style output stream: `render` is invoked on the
    /// hardware callback thread and must fill `frames` samples into each of
    /// `channels` mutable output buffers.
    fn open_output_stream(
        &self,
        uid: &str,
        config: StreamConfig,
        render: Box<dyn FnMut(&mut [&mut [f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioOutputStream>, EngineError>;
}

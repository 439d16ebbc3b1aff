//! Typed control-domain errors (spec §7).
//!
//! Callback-domain failures never surface here: a render or capture callback
//! that would otherwise error instead produces silence and advances the
//! underrun/overrun counters in [`crate::engine::EngineStats`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no active session")]
    NoSession,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("sample rate {rate} not supported by device {uid}")]
    SampleRateNotSupported { uid: String, rate: u32 },

    #[error("failed to set sample rate {rate} on device {uid}")]
    SampleRateSetFailed { uid: String, rate: u32 },

    #[error("failed to set buffer size {frames} on device {uid}")]
    BufferSetFailed { uid: String, frames: u32 },

    #[error("invalid input channel {channel} on device {uid} ({count} channels available)")]
    InvalidInputChannel {
        uid: String,
        channel: usize,
        count: usize,
    },

    #[error("invalid output channel {channel} on device {uid} ({count} channels available)")]
    InvalidOutputChannel {
        uid: String,
        channel: usize,
        count: usize,
    },

    #[error("failed to start input stream on device {0}")]
    InputStartFailed(String),

    #[error("failed to start output stream on device {0}")]
    OutputStartFailed(String),

    #[error("device {0} reports zero channels in the required direction")]
    InvalidDeviceChannels(String),

    #[error("route id already exists: {0}")]
    DuplicateRoute(String),

    #[error("route not found: {0}")]
    RouteNotFound(String),
}

//! Control-domain command/event surface (spec §6 "Commands" / "Events").
//!
//! Mirrors the teacher's `Action`/`Message` split in `message.rs`: one enum
//! for requests the control domain accepts, one for notifications it emits
//! to subscribers. Kept far smaller here since persistence, UI, and
//! transport framing are out of scope (spec §1 Non-goals) — callers send
//! `EngineCommand`s and get a `Result<EngineResponse, EngineError>` back
//! directly, rather than correlating async replies by request id the way
//! the teacher's `Action::Request`/`Message::Response` pair do.

use crate::device::DeviceDescriptor;
use crate::engine::EngineStats;
use crate::route::Route;

#[derive(Debug, Clone)]
pub enum EngineCommand {
    ListDevices,
    GetDefaultDevices,
    /// Starts (or retunes) the session, keyed on the output device — inputs
    /// are never named here, they arrive per-route via `AddRoute` (spec §6
    /// "startSession").
    StartSession {
        output_uid: String,
        sample_rate: u32,
        buffer_frames: u32,
    },
    StopSession,
    GetStats,
    AddRoute(Route),
    RemoveRoute { id: String },
    SetRouteEnabled { id: String, enabled: bool },
    SetRouteGain { id: String, gain: f32 },
}

#[derive(Debug, Clone)]
pub enum EngineResponse {
    Devices(Vec<DeviceDescriptor>),
    DefaultDevices {
        input_uid: Option<String>,
        output_uid: Option<String>,
    },
    Stats(EngineStats),
    Routes(Vec<Route>),
    Ack,
}

/// Notifications the engine broadcasts to subscribed [`crate::client::Client`]s,
/// independent of any particular command (spec §4.4 "Device Watcher").
#[derive(Debug, Clone)]
pub enum EngineEvent {
    DeviceConnected(DeviceDescriptor),
    DeviceDisconnected { uid: String },
    RouteDisabledByDevice { route_id: String },
    StatsUpdated(EngineStats),
}

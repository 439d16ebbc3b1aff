//! In-process audio routing engine: a ring-buffered sample pipeline, a
//! per-output render callback, and a device hot-plug lifecycle (spec
//! §1 "Overview").
//!
//! Mirrors the shape of the teacher's `lib.rs`: modules are declared here,
//! and [`init`] wires a default [`cpal_host::CpalHostAudioApi`] into a
//! fresh [`engine::Engine`] and spawns its [`engine::Engine::start_watcher`]
//! task, returning a [`client::Client`] handle the way the teacher's
//! `init()` returns a `Sender<Message>`.

pub mod client;
pub mod config;
pub mod cpal_host;
pub mod device;
pub mod engine;
pub mod error;
pub mod input_tap;
pub mod message;
pub mod output_unit;
pub mod ring_buffer;
pub mod route;
pub mod watcher;

use std::sync::Arc;

pub use client::Client;
pub use device::{DeviceDescriptor, HostAudioApi};
pub use engine::{Engine, EngineStats};
pub use error::EngineError;
pub use message::{EngineCommand, EngineEvent, EngineResponse};
pub use route::{Route, RouteState};

/// Builds an [`Engine`] on top of the real `cpal` host API, starts its
/// device watcher, and returns a [`Client`] handle. Requires a running
/// Tokio runtime (the watcher is spawned onto it).
pub fn init() -> Client {
    let host = Arc::new(cpal_host::CpalHostAudioApi::new());
    init_with_host(host)
}

/// Same as [`init`] but with a caller-supplied [`HostAudioApi`], for tests
/// and for hosts embedding this crate with their own audio backend.
pub fn init_with_host(host: Arc<dyn HostAudioApi>) -> Client {
    let engine = Engine::new(host);
    engine.start_watcher();
    Client::new(engine)
}

//! Thin handle callers hold onto (spec §6 "Commands" / "Events").
//!
//! Grounded on the teacher's `client.rs`: a small `Clone`-able struct around
//! a shared handle, with `subscribe()` handing out a fresh event stream.
//! The teacher's `Client` goes through a channel because its `Engine` is a
//! message-driven actor; this `Engine` already synchronizes its own state
//! internally; so `Client` just forwards each [`EngineCommand`] straight to
//! the matching `Engine` method and wraps the result as an
//! [`EngineResponse`].

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::message::{EngineCommand, EngineEvent, EngineResponse};

#[derive(Clone)]
pub struct Client {
    engine: Arc<Engine>,
}

impl Client {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    pub fn send(&self, command: EngineCommand) -> Result<EngineResponse, EngineError> {
        match command {
            EngineCommand::ListDevices => Ok(EngineResponse::Devices(self.engine.list_devices())),
            EngineCommand::GetDefaultDevices => {
                let defaults = self.engine.default_devices();
                Ok(EngineResponse::DefaultDevices {
                    input_uid: defaults.input_uid,
                    output_uid: defaults.output_uid,
                })
            }
            EngineCommand::StartSession {
                output_uid,
                sample_rate,
                buffer_frames,
            } => {
                self.engine
                    .start_session(&output_uid, sample_rate, buffer_frames)?;
                Ok(EngineResponse::Ack)
            }
            EngineCommand::StopSession => {
                self.engine.stop_session()?;
                Ok(EngineResponse::Ack)
            }
            EngineCommand::GetStats => Ok(EngineResponse::Stats(self.engine.get_stats())),
            EngineCommand::AddRoute(route) => {
                self.engine.add_route(route)?;
                Ok(EngineResponse::Routes(self.engine.list_routes()))
            }
            EngineCommand::RemoveRoute { id } => {
                self.engine.remove_route(&id)?;
                Ok(EngineResponse::Routes(self.engine.list_routes()))
            }
            EngineCommand::SetRouteEnabled { id, enabled } => {
                self.engine.set_route_enabled(&id, enabled)?;
                Ok(EngineResponse::Routes(self.engine.list_routes()))
            }
            EngineCommand::SetRouteGain { id, gain } => {
                self.engine.set_route_gain(&id, gain)?;
                Ok(EngineResponse::Routes(self.engine.list_routes()))
            }
        }
    }
}

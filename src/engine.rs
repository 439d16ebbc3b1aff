//! The Router/Engine: owns the route table, the Input Taps and Output
//! Units of the active session, and the render algorithm that turns routes
//! into mixed audio (spec §3 "Engine", §4.5 "Render").
//!
//! Structurally this is the teacher's `Engine` actor cut down to the
//! routing core: the control-domain methods below (`add_route`,
//! `start_session`, ...) play the role of the teacher's `handle_request`
//! match arms, and [`Engine::render_output`] plays the role of its
//! per-track render path — but here there is exactly one shared render
//! entry point instead of a tree of per-track/per-clip processors, since a
//! patch bay mixes raw routes, not a timeline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config;
use crate::device::{DefaultDevices, DeviceDescriptor, HostAudioApi};
use crate::error::EngineError;
use crate::input_tap::InputTap;
use crate::message::EngineEvent;
use crate::output_unit::OutputUnit;
use crate::ring_buffer::ReadWindow;
use crate::route::{Route, RouteState};
use crate::watcher::DeviceWatcher;

/// The session is keyed on the output device alone (spec §6 "startSession":
/// `{outputDeviceUID, sampleRate, bufferFrames}`) — input devices are never
/// named here, they arrive per-route through `AddRoute`, each pulling up its
/// own Input Tap on demand (spec §4.5 "Route lifecycle").
#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    Idle,
    Running {
        output_uid: String,
        sample_rate: u32,
        buffer_frames: u32,
    },
}

/// Point-in-time counters exposed through `EngineCommand::GetStats` (spec
/// §6 "getStats").
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub session_active: bool,
    pub route_count: usize,
    pub enabled_route_count: usize,
    pub input_tap_count: usize,
    pub output_unit_count: usize,
    pub underruns: u64,
    pub overruns: u64,
}

pub struct Engine {
    host: Arc<dyn HostAudioApi>,
    session: Mutex<SessionState>,
    routes: Mutex<Vec<Route>>,
    route_index: Mutex<HashMap<String, Vec<Route>>>,
    input_taps: Mutex<HashMap<String, InputTap>>,
    output_units: Mutex<HashMap<String, OutputUnit>>,
    underruns: AtomicU64,
    overruns: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(host: Arc<dyn HostAudioApi>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            host,
            session: Mutex::new(SessionState::Idle),
            routes: Mutex::new(Vec::new()),
            route_index: Mutex::new(HashMap::new()),
            input_taps: Mutex::new(HashMap::new()),
            output_units: Mutex::new(HashMap::new()),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is the common case when nothing has subscribed yet;
        // that's not an error.
        let _ = self.events.send(event);
    }

    // ---- Device directory -------------------------------------------------

    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.host.list_devices()
    }

    pub fn default_devices(&self) -> DefaultDevices {
        self.host.default_devices()
    }

    // ---- Session lifecycle (spec §4.5 "Session") ---------------------------

    /// Starts (or retunes, if a different output/rate/buffer is requested)
    /// the active session. Idempotent when called again with identical
    /// arguments. Creates no Input Taps or Output Units itself — those are
    /// pulled up per-UID by [`Self::add_route`] as routes come to reference
    /// them (spec §4.5) — except for routes that already exist in the table
    /// from a prior session, which are reactivated against the new session
    /// immediately so they don't sit silently orphaned.
    pub fn start_session(
        self: &Arc<Self>,
        output_uid: &str,
        sample_rate: u32,
        buffer_frames: u32,
    ) -> Result<(), EngineError> {
        if !config::RECOGNISED_BUFFER_SIZES.contains(&buffer_frames) {
            return Err(EngineError::InvalidArgs(format!(
                "unrecognised buffer size {buffer_frames}"
            )));
        }

        {
            let session = self.session.lock();
            if let SessionState::Running {
                output_uid: cur_out,
                sample_rate: cur_rate,
                buffer_frames: cur_frames,
            } = &*session
            {
                if cur_out == output_uid && *cur_rate == sample_rate && *cur_frames == buffer_frames
                {
                    return Ok(());
                }
            }
        }
        if matches!(*self.session.lock(), SessionState::Running { .. }) {
            self.stop_session()?;
        }

        let output = self
            .host
            .device(output_uid)
            .ok_or_else(|| EngineError::DeviceNotFound(output_uid.to_string()))?;
        if output.output_channels == 0 {
            return Err(EngineError::InvalidDeviceChannels(output_uid.to_string()));
        }

        let negotiated_rate = self.host.set_sample_rate(output_uid, sample_rate)?;
        let negotiated_frames = self.host.set_buffer_frames(output_uid, buffer_frames)?;

        *self.session.lock() = SessionState::Running {
            output_uid: output_uid.to_string(),
            sample_rate: negotiated_rate,
            buffer_frames: negotiated_frames,
        };
        info!(output = %output_uid, sample_rate = %negotiated_rate, buffer_frames = %negotiated_frames, "session started");

        self.activate_existing_routes(negotiated_rate, negotiated_frames);
        self.rebuild_route_index();
        self.resync_readers();
        Ok(())
    }

    /// Re-pulls up Input Taps/Output Units for routes that survived a
    /// previous session (spec §4.5: routes outlive a session, hardware
    /// resources don't). Failures are logged, not propagated — a route
    /// whose device has since vanished stays in the table, just silent
    /// until its device reappears or the user removes it.
    fn activate_existing_routes(self: &Arc<Self>, sample_rate: u32, buffer_frames: u32) {
        for route in self.routes.lock().iter().filter(|r| r.is_enabled()).cloned().collect::<Vec<_>>() {
            if let Err(err) = self.ensure_input_tap(&route.input_uid, sample_rate, buffer_frames) {
                warn!(route = %route.id, %err, "could not reactivate input tap for surviving route");
                continue;
            }
            if let Err(err) = self.ensure_output_unit(&route.output_uid, sample_rate, buffer_frames) {
                warn!(route = %route.id, %err, "could not reactivate output unit for surviving route");
            }
        }
    }

    pub fn stop_session(&self) -> Result<(), EngineError> {
        let previous = {
            let mut session = self.session.lock();
            std::mem::replace(&mut *session, SessionState::Idle)
        };
        let SessionState::Running { output_uid, .. } = previous else {
            return Err(EngineError::NoSession);
        };
        for (_, mut tap) in self.input_taps.lock().drain() {
            tap.stop();
        }
        for (_, mut unit) in self.output_units.lock().drain() {
            unit.stop();
        }
        info!(output = %output_uid, "session stopped");
        Ok(())
    }

    fn require_session_active(&self) -> Result<(), EngineError> {
        if self.is_session_active() {
            Ok(())
        } else {
            Err(EngineError::NoSession)
        }
    }

    /// Returns the active session's negotiated sample rate and buffer size,
    /// or `NoSession` if idle (spec §7: "In Idle, all route operations fail
    /// with no_session").
    fn session_params(&self) -> Result<(u32, u32), EngineError> {
        match &*self.session.lock() {
            SessionState::Running {
                sample_rate,
                buffer_frames,
                ..
            } => Ok((*sample_rate, *buffer_frames)),
            SessionState::Idle => Err(EngineError::NoSession),
        }
    }

    /// Ensures an Input Tap exists and is running for `uid`, creating and
    /// starting one if absent (spec §4.5 "Route lifecycle"). Idempotent.
    fn ensure_input_tap(&self, uid: &str, sample_rate: u32, buffer_frames: u32) -> Result<(), EngineError> {
        if self.input_taps.lock().contains_key(uid) {
            return Ok(());
        }
        let device = self
            .host
            .device(uid)
            .ok_or_else(|| EngineError::DeviceNotFound(uid.to_string()))?;
        if device.input_channels == 0 {
            return Err(EngineError::InvalidDeviceChannels(uid.to_string()));
        }
        let rate = self.host.set_sample_rate(uid, sample_rate)?;
        let frames = self.host.set_buffer_frames(uid, buffer_frames)?;
        let mut tap = InputTap::new(uid.to_string(), device.input_channels, frames);
        tap.start(self.host.as_ref(), rate, frames)?;
        self.input_taps.lock().insert(uid.to_string(), tap);
        info!(device = %uid, "input tap created");
        Ok(())
    }

    /// Ensures an Output Unit exists and is running for `uid`, creating and
    /// starting one if absent (spec §4.5 "Route lifecycle"). Idempotent.
    fn ensure_output_unit(
        self: &Arc<Self>,
        uid: &str,
        sample_rate: u32,
        buffer_frames: u32,
    ) -> Result<(), EngineError> {
        if self.output_units.lock().contains_key(uid) {
            return Ok(());
        }
        let device = self
            .host
            .device(uid)
            .ok_or_else(|| EngineError::DeviceNotFound(uid.to_string()))?;
        if device.output_channels == 0 {
            return Err(EngineError::InvalidDeviceChannels(uid.to_string()));
        }
        let rate = self.host.set_sample_rate(uid, sample_rate)?;
        let frames = self.host.set_buffer_frames(uid, buffer_frames)?;
        let mut unit = OutputUnit::new(uid.to_string(), device.output_channels);
        unit.start(self.host.as_ref(), Arc::downgrade(self), rate, frames)?;
        self.output_units.lock().insert(uid.to_string(), unit);
        info!(device = %uid, "output unit created");
        Ok(())
    }

    /// Stops and drops any Input Tap/Output Unit no longer referenced by any
    /// route, enabled or not (spec §4.5 "Route lifecycle" teardown).
    fn teardown_unreferenced_taps_and_units(&self) {
        let (referenced_inputs, referenced_outputs) = {
            let routes = self.routes.lock();
            let inputs: HashSet<String> = routes.iter().map(|r| r.input_uid.clone()).collect();
            let outputs: HashSet<String> = routes.iter().map(|r| r.output_uid.clone()).collect();
            (inputs, outputs)
        };

        let stale_inputs: Vec<String> = self
            .input_taps
            .lock()
            .keys()
            .filter(|uid| !referenced_inputs.contains(*uid))
            .cloned()
            .collect();
        for uid in stale_inputs {
            if let Some(mut tap) = self.input_taps.lock().remove(&uid) {
                tap.stop();
            }
        }

        let stale_outputs: Vec<String> = self
            .output_units
            .lock()
            .keys()
            .filter(|uid| !referenced_outputs.contains(*uid))
            .cloned()
            .collect();
        for uid in stale_outputs {
            if let Some(mut unit) = self.output_units.lock().remove(&uid) {
                unit.stop();
            }
        }
    }

    pub fn is_session_active(&self) -> bool {
        matches!(*self.session.lock(), SessionState::Running { .. })
    }

    /// Spawns the polling [`DeviceWatcher`] and a bridge task that marshals
    /// its events onto this engine's control-domain handlers (spec §4.4).
    pub fn start_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let watcher = DeviceWatcher::new(Arc::clone(&self.host));
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(watcher.run(tx));
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    EngineEvent::DeviceConnected(device) => engine.handle_device_connected(device),
                    EngineEvent::DeviceDisconnected { uid } => {
                        engine.handle_device_disconnected(&uid)
                    }
                    other => engine.emit(other),
                }
            }
        })
    }

    // ---- Route table (spec §4.5 "Route lifecycle") ------------------------

    /// Ensures an Input Tap exists for the route's input UID and an Output
    /// Unit exists for its output UID (creating and starting either if
    /// absent), registers the output UID as a reader on the input tap's
    /// ring buffer *before* a freshly created Output Unit begins rendering,
    /// then adds the route (spec §4.5 "Route lifecycle"). Fails with
    /// `no_session` while idle (spec §7).
    pub fn add_route(self: &Arc<Self>, route: Route) -> Result<(), EngineError> {
        let (sample_rate, buffer_frames) = self.session_params()?;
        self.validate_route_channels(&route)?;
        {
            let mut routes = self.routes.lock();
            if routes.iter().any(|r| r.id == route.id) {
                return Err(EngineError::DuplicateRoute(route.id));
            }
            routes.push(route.clone());
        }
        self.rebuild_route_index();

        if let Err(err) = self.ensure_input_tap(&route.input_uid, sample_rate, buffer_frames) {
            self.routes.lock().retain(|r| r.id != route.id);
            self.rebuild_route_index();
            return Err(err);
        }
        // The reader must exist on the input tap's ring buffer before the
        // output unit (if this call is the one creating it) starts pulling
        // render callbacks, or its first callback would see no reader and
        // underrun immediately.
        self.resync_readers();
        if let Err(err) = self.ensure_output_unit(&route.output_uid, sample_rate, buffer_frames) {
            self.routes.lock().retain(|r| r.id != route.id);
            self.rebuild_route_index();
            self.resync_readers();
            self.teardown_unreferenced_taps_and_units();
            return Err(err);
        }
        Ok(())
    }

    pub fn remove_route(&self, id: &str) -> Result<(), EngineError> {
        self.require_session_active()?;
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|r| r.id != id);
        if routes.len() == before {
            return Err(EngineError::RouteNotFound(id.to_string()));
        }
        drop(routes);
        self.rebuild_route_index();
        self.resync_readers();
        self.teardown_unreferenced_taps_and_units();
        Ok(())
    }

    pub fn set_route_enabled(&self, id: &str, enabled: bool) -> Result<(), EngineError> {
        self.require_session_active()?;
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EngineError::RouteNotFound(id.to_string()))?;
        route.state = if enabled {
            RouteState::Enabled
        } else {
            RouteState::DisabledByUser
        };
        drop(routes);
        self.rebuild_route_index();
        self.resync_readers();
        Ok(())
    }

    pub fn set_route_gain(&self, id: &str, gain: f32) -> Result<(), EngineError> {
        self.require_session_active()?;
        if !gain.is_finite() {
            return Err(EngineError::InvalidArgs(format!("non-finite gain {gain}")));
        }
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EngineError::RouteNotFound(id.to_string()))?;
        route.gain = gain;
        drop(routes);
        self.rebuild_route_index();
        Ok(())
    }

    pub fn list_routes(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }

    /// Exposes the ring buffer backing input device `uid`'s tap, if a
    /// session with that input is active. Useful for metering and for
    /// driving test doubles that don't go through a real hardware
    /// callback.
    pub fn input_ring(&self, uid: &str) -> Option<Arc<crate::ring_buffer::RingBuffer>> {
        self.input_taps.lock().get(uid).map(|tap| tap.ring())
    }

    pub fn get_stats(&self) -> EngineStats {
        let routes = self.routes.lock();
        EngineStats {
            session_active: self.is_session_active(),
            route_count: routes.len(),
            enabled_route_count: routes.iter().filter(|r| r.is_enabled()).count(),
            input_tap_count: self.input_taps.lock().len(),
            output_unit_count: self.output_units.lock().len(),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    /// Validates the route's 1-based channel numbers against each device's
    /// channel count (spec §3/§6: "1-based at the boundary"). `0` and any
    /// number past the device's channel count are rejected.
    fn validate_route_channels(&self, route: &Route) -> Result<(), EngineError> {
        let input = self
            .host
            .device(&route.input_uid)
            .ok_or_else(|| EngineError::DeviceNotFound(route.input_uid.clone()))?;
        let output = self
            .host
            .device(&route.output_uid)
            .ok_or_else(|| EngineError::DeviceNotFound(route.output_uid.clone()))?;

        let check_in = |channel: usize| -> Result<(), EngineError> {
            if channel == 0 || channel > input.input_channels {
                Err(EngineError::InvalidInputChannel {
                    uid: route.input_uid.clone(),
                    channel,
                    count: input.input_channels,
                })
            } else {
                Ok(())
            }
        };
        let check_out = |channel: usize| -> Result<(), EngineError> {
            if channel == 0 || channel > output.output_channels {
                Err(EngineError::InvalidOutputChannel {
                    uid: route.output_uid.clone(),
                    channel,
                    count: output.output_channels,
                })
            } else {
                Ok(())
            }
        };

        check_in(route.input_left)?;
        if let Some(c) = route.input_right {
            check_in(c)?;
        }
        check_out(route.output_left)?;
        if let Some(c) = route.output_right {
            check_out(c)?;
        }
        Ok(())
    }

    fn rebuild_route_index(&self) {
        let routes = self.routes.lock();
        let mut index: HashMap<String, Vec<Route>> = HashMap::new();
        for route in routes.iter() {
            index.entry(route.output_uid.clone()).or_default().push(route.clone());
        }
        *self.route_index.lock() = index;
    }

    /// After any route-table change, recomputes which output UIDs each
    /// input tap's ring buffer must keep a reader for, registering newly
    /// needed readers and pruning ones no route references anymore (spec
    /// §4.1 "Registration policy", §4.2 "Reader lifecycle").
    fn resync_readers(&self) {
        let mut keep_by_input: HashMap<String, HashSet<String>> = HashMap::new();
        for route in self.routes.lock().iter().filter(|r| r.is_enabled()) {
            keep_by_input
                .entry(route.input_uid.clone())
                .or_default()
                .insert(route.output_uid.clone());
        }
        for (uid, tap) in self.input_taps.lock().iter() {
            let keep = keep_by_input.get(uid).cloned().unwrap_or_default();
            for output_uid in &keep {
                tap.register_reader(output_uid);
            }
            tap.prune_readers(&keep);
        }
    }

    // ---- Device hot-plug (spec §4.5 "Disconnect/reconnect") ---------------

    /// Normally invoked by the [`crate::watcher::DeviceWatcher`] bridge
    /// task spawned from [`Self::start_watcher`]; exposed so callers with
    /// their own hot-plug notification source can feed it directly.
    pub fn handle_device_connected(&self, device: DeviceDescriptor) {
        info!(uid = %device.uid, "device connected, no automatic route changes");
        self.emit(EngineEvent::DeviceConnected(device));
    }

    /// See [`Self::handle_device_connected`].
    pub fn handle_device_disconnected(&self, uid: &str) {
        warn!(%uid, "device disconnected");
        let mut affected = Vec::new();
        {
            let mut routes = self.routes.lock();
            for route in routes.iter_mut() {
                if route.references_device(uid) && route.is_enabled() {
                    route.mark_disabled_by_device();
                    affected.push(route.id.clone());
                }
            }
        }
        self.rebuild_route_index();
        self.resync_readers();

        if let Some(mut tap) = self.input_taps.lock().remove(uid) {
            tap.stop();
        }
        if let Some(mut unit) = self.output_units.lock().remove(uid) {
            unit.stop();
        }
        {
            let mut session = self.session.lock();
            if let SessionState::Running { output_uid, .. } = &*session {
                if output_uid == uid {
                    *session = SessionState::Idle;
                }
            }
        }

        self.emit(EngineEvent::DeviceDisconnected {
            uid: uid.to_string(),
        });
        for route_id in affected {
            self.emit(EngineEvent::RouteDisabledByDevice { route_id });
        }
    }

    // ---- Render (spec §4.5 "Render") ---------------------------------------

    /// Mixes every enabled route targeting `output_uid` into `channels`.
    /// Called directly from the output hardware callback; allocates
    /// nothing and never blocks longer than the short, bounded lock
    /// sections already used by [`crate::ring_buffer::RingBuffer`].
    pub fn render_output(&self, output_uid: &str, channels: &mut [&mut [f32]], frames: usize) {
        for channel in channels.iter_mut() {
            channel[..frames].fill(0.0);
        }
        if frames == 0 {
            return;
        }
        let frames = frames.min(config::MAX_RENDER_BLOCK_FRAMES);

        let index = self.route_index.lock();
        let Some(routes) = index.get(output_uid) else {
            return;
        };
        let input_taps = self.input_taps.lock();

        let mut windows: [Option<(&str, ReadWindow)>; config::MAX_DISTINCT_INPUTS_PER_OUTPUT] =
            std::array::from_fn(|_| None);

        for route in routes.iter().filter(|r| r.is_enabled()) {
            if windows
                .iter()
                .flatten()
                .any(|(uid, _)| *uid == route.input_uid)
            {
                continue;
            }
            let Some(tap) = input_taps.get(&route.input_uid) else {
                continue;
            };
            let window = tap.ring().begin_read(output_uid, frames);
            if window.underrun {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
            if window.overrun {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
            match windows.iter_mut().find(|slot| slot.is_none()) {
                Some(slot) => *slot = Some((route.input_uid.as_str(), window)),
                None => warn!(
                    output = %output_uid,
                    "more distinct input devices than MAX_DISTINCT_INPUTS_PER_OUTPUT, dropping route {}",
                    route.id
                ),
            }
        }

        let mut scratch = [0.0_f32; config::MAX_RENDER_BLOCK_FRAMES];

        for route in routes.iter().filter(|r| r.is_enabled()) {
            let Some(tap) = input_taps.get(&route.input_uid) else {
                continue;
            };
            let Some((_, window)) = windows
                .iter()
                .flatten()
                .find(|(uid, _)| *uid == route.input_uid)
            else {
                continue;
            };
            let avail = window.available;
            if avail == 0 {
                continue;
            }
            let ring = tap.ring();

            // Route channel numbers are 1-based at the boundary; convert to
            // 0-based indices here, at the one place that touches storage.
            ring.read_channel(window.start, avail, route.input_left - 1, &mut scratch[..avail]);
            mix_into(
                &mut channels[route.output_left - 1][..avail],
                &scratch[..avail],
                route.gain,
            );

            if let (Some(in_right), Some(out_right)) = (route.input_right, route.output_right) {
                ring.read_channel(window.start, avail, in_right - 1, &mut scratch[..avail]);
                mix_into(
                    &mut channels[out_right - 1][..avail],
                    &scratch[..avail],
                    route.gain,
                );
            }
        }

        for (uid, window) in windows.iter().flatten() {
            if let Some(tap) = input_taps.get(*uid) {
                tap.ring().end_read(output_uid, window.available);
            }
        }
    }
}

fn mix_into(dst: &mut [f32], src: &[f32], gain: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s * gain;
    }
}

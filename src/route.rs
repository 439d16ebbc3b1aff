//! Routes: the persistent unit of "this input channel feeds that output
//! channel" (spec §3 "Route", §6 "Persistence format").

use serde::{Deserialize, Serialize};

/// Why a route is not currently contributing to a render, if it isn't
/// (spec §4.5 "Route lifecycle"). `DisabledByDevice` is set by the engine
/// when the device backing the route disconnects; only the control domain
/// can set or clear `DisabledByUser`, and reconnecting a device never
/// flips `DisabledByDevice` back on its own (spec §4.5, disconnect/reconnect
/// state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Enabled,
    DisabledByUser,
    DisabledByDevice,
}

impl RouteState {
    pub fn is_enabled(self) -> bool {
        matches!(self, RouteState::Enabled)
    }
}

/// One routed signal path: a stereo (or mono-to-mono) tap from an input
/// device's channels to an output device's channels, with a gain.
///
/// Derives full-field `PartialEq`/`Eq` rather than `Hash`: a route-set
/// change detector that hashed routes to skip "unchanged" work previously
/// went stale whenever a field was added without updating the hash, so the
/// index is always rebuilt from an explicit equality diff instead (spec §9
/// Open Question (b)).
///
/// Channel fields are 1-based at this boundary (spec §3/§6: "1-based at the
/// boundary and 0-based internally") — channel `1` is a device's first
/// channel. `0` is never a valid channel number; the engine converts to
/// 0-based indices internally when it touches a ring buffer or an output
/// slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub input_uid: String,
    pub input_left: usize,
    pub input_right: Option<usize>,
    pub output_uid: String,
    pub output_left: usize,
    pub output_right: Option<usize>,
    /// Linear gain multiplier applied at render time (spec §4.5 "Render").
    pub gain: f32,
    pub state: RouteState,
}

impl Route {
    pub fn is_stereo(&self) -> bool {
        self.input_right.is_some() && self.output_right.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Marks the route disabled by a device disconnect, unless the user had
    /// already disabled it (user intent always wins, spec §4.5).
    pub fn mark_disabled_by_device(&mut self) {
        if self.state == RouteState::Enabled {
            self.state = RouteState::DisabledByDevice;
        }
    }

    pub fn references_device(&self, uid: &str) -> bool {
        self.input_uid == uid || self.output_uid == uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route {
            id: "r1".into(),
            input_uid: "in-1".into(),
            input_left: 1,
            input_right: Some(2),
            output_uid: "out-1".into(),
            output_left: 1,
            output_right: Some(2),
            gain: 1.0,
            state: RouteState::Enabled,
        }
    }

    #[test]
    fn mark_disabled_by_device_does_not_override_user_disable() {
        let mut r = route();
        r.state = RouteState::DisabledByUser;
        r.mark_disabled_by_device();
        assert_eq!(r.state, RouteState::DisabledByUser);
    }

    #[test]
    fn mark_disabled_by_device_disables_enabled_route() {
        let mut r = route();
        r.mark_disabled_by_device();
        assert_eq!(r.state, RouteState::DisabledByDevice);
    }

    #[test]
    fn references_device_matches_either_side() {
        let r = route();
        assert!(r.references_device("in-1"));
        assert!(r.references_device("out-1"));
        assert!(!r.references_device("in-2"));
    }

    #[test]
    fn serde_round_trip_preserves_all_fields() {
        let r = route();
        let json = serde_json::to_string(&r).unwrap();
        let back: Route = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}

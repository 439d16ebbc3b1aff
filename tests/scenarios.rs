//! End-to-end scenarios from spec §8, driven against a fake
//! [`HostAudioApi`] instead of real hardware: these exercise the engine's
//! route table and render algorithm the same way a real session would,
//! without needing an audio device to run on CI (spec §8 "Concrete
//! scenarios").

use std::sync::Arc;

use patchbay_engine::{
    Client, DeviceDescriptor, EngineCommand, EngineError, EngineResponse, HostAudioApi, Route,
    RouteState,
};

use patchbay_engine::device::{AudioInputStream, AudioOutputStream, DefaultDevices, StreamConfig};

struct FakeInputStream;
impl AudioInputStream for FakeInputStream {
    fn stop(&mut self) {}
}
struct FakeOutputStream;
impl AudioOutputStream for FakeOutputStream {
    fn stop(&mut self) {}
}

struct FakeHost {
    devices: Vec<DeviceDescriptor>,
}

impl FakeHost {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: vec![
                DeviceDescriptor {
                    uid: "in-1".into(),
                    name: "Fake Input".into(),
                    input_channels: 2,
                    output_channels: 0,
                    supported_sample_rates: vec![48_000],
                    is_default_input: true,
                    is_default_output: false,
                },
                DeviceDescriptor {
                    uid: "in-2".into(),
                    name: "Fake Input 2".into(),
                    input_channels: 2,
                    output_channels: 0,
                    supported_sample_rates: vec![48_000],
                    is_default_input: false,
                    is_default_output: false,
                },
                DeviceDescriptor {
                    uid: "out-1".into(),
                    name: "Fake Output".into(),
                    input_channels: 0,
                    output_channels: 2,
                    supported_sample_rates: vec![48_000],
                    is_default_input: false,
                    is_default_output: true,
                },
            ],
        })
    }
}

impl HostAudioApi for FakeHost {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.clone()
    }
    fn default_devices(&self) -> DefaultDevices {
        DefaultDevices {
            input_uid: Some("in-1".to_string()),
            output_uid: Some("out-1".to_string()),
        }
    }
    fn set_sample_rate(&self, _uid: &str, rate: u32) -> Result<u32, EngineError> {
        Ok(rate)
    }
    fn set_buffer_frames(&self, _uid: &str, frames: u32) -> Result<u32, EngineError> {
        Ok(frames)
    }
    fn open_input_stream(
        &self,
        _uid: &str,
        _config: StreamConfig,
        _on_data: Box<dyn FnMut(&[&[f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioInputStream>, EngineError> {
        Ok(Box::new(FakeInputStream))
    }
    fn open_output_stream(
        &self,
        _uid: &str,
        _config: StreamConfig,
        _render: Box<dyn FnMut(&mut [&mut [f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioOutputStream>, EngineError> {
        Ok(Box::new(FakeOutputStream))
    }
}

/// Starts a session keyed on `out-1` (spec §6 "startSession": session is
/// keyed on the output device, not on any particular input).
fn started_client() -> Client {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = patchbay_engine::init_with_host(FakeHost::new());
    client
        .send(EngineCommand::StartSession {
            output_uid: "out-1".into(),
            sample_rate: 48_000,
            buffer_frames: 256,
        })
        .unwrap();
    client
}

/// A stereo route from `input_uid`'s channels 1/2 to `out-1`'s channels 1/2
/// (spec §3/§6: route channel fields are 1-based at the boundary).
fn plain_route(id: &str, input_uid: &str, input_left: usize, input_right: Option<usize>, gain: f32) -> Route {
    Route {
        id: id.into(),
        input_uid: input_uid.into(),
        input_left,
        input_right,
        output_uid: "out-1".into(),
        output_left: 1,
        output_right: Some(2),
        gain,
        state: RouteState::Enabled,
    }
}

fn render(client: &Client, frames: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0_f32; frames];
    let mut right = vec![0.0_f32; frames];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    client.engine().render_output("out-1", &mut channels, frames);
    (left, right)
}

#[tokio::test]
async fn single_stereo_pass_through() {
    let client = started_client();
    client
        .send(EngineCommand::AddRoute(plain_route(
            "r1", "in-1", 1, Some(2), 1.0,
        )))
        .unwrap();

    let ring = client.engine().input_ring("in-1").unwrap();
    let l = [0.4_f32; 16];
    let r = [-0.3_f32; 16];
    ring.write(&[&l, &r], 16);

    let (out_l, out_r) = render(&client, 16);
    assert!(out_l.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    assert!(out_r.iter().all(|&s| (s + 0.3).abs() < 1e-6));
}

#[tokio::test]
async fn mix_two_distinct_input_devices_into_one_output() {
    let client = started_client();
    // Scenario 2 (spec §8): R1 from IN1, R2 from IN2, both landing on the
    // same output channel — two distinct Input Taps, one Output Unit.
    client
        .send(EngineCommand::AddRoute(Route {
            output_right: None,
            input_right: None,
            ..plain_route("r1", "in-1", 1, None, 1.0)
        }))
        .unwrap();
    client
        .send(EngineCommand::AddRoute(Route {
            output_right: None,
            input_right: None,
            ..plain_route("r2", "in-2", 1, None, 1.0)
        }))
        .unwrap();

    assert_eq!(client.engine().get_stats().input_tap_count, 2);
    assert_eq!(client.engine().get_stats().output_unit_count, 1);

    client
        .engine()
        .input_ring("in-1")
        .unwrap()
        .write(&[&[0.2_f32; 8], &[0.0_f32; 8]], 8);
    client
        .engine()
        .input_ring("in-2")
        .unwrap()
        .write(&[&[0.1_f32; 8], &[0.0_f32; 8]], 8);

    let (out_l, _) = render(&client, 8);
    assert!(out_l.iter().all(|&s| (s - 0.3).abs() < 1e-6));
}

#[tokio::test]
async fn channel_remap_swaps_left_and_right() {
    let client = started_client();
    // input channel 2 -> output left, input channel 1 -> output right.
    client
        .send(EngineCommand::AddRoute(plain_route(
            "swap",
            "in-1",
            2,
            Some(1),
            1.0,
        )))
        .unwrap();

    let ring = client.engine().input_ring("in-1").unwrap();
    let l = [0.9_f32; 4];
    let r = [0.1_f32; 4];
    ring.write(&[&l, &r], 4);

    let (out_l, out_r) = render(&client, 4);
    assert!(out_l.iter().all(|&s| (s - 0.1).abs() < 1e-6));
    assert!(out_r.iter().all(|&s| (s - 0.9).abs() < 1e-6));
}

#[tokio::test]
async fn disconnect_disables_route_and_silences_output_reconnect_stays_disabled() {
    let client = started_client();
    client
        .send(EngineCommand::AddRoute(plain_route(
            "r1", "in-1", 1, Some(2), 1.0,
        )))
        .unwrap();

    let ring = client.engine().input_ring("in-1").unwrap();
    ring.write(&[&[0.5_f32; 4], &[0.5_f32; 4]], 4);

    client.engine().handle_device_disconnected("in-1");

    let routes = client.engine().list_routes();
    assert_eq!(routes[0].state, RouteState::DisabledByDevice);

    let (out_l, out_r) = render(&client, 4);
    assert_eq!(out_l, vec![0.0; 4]);
    assert_eq!(out_r, vec![0.0; 4]);

    client.engine().handle_device_connected(DeviceDescriptor {
        uid: "in-1".into(),
        name: "Fake Input".into(),
        input_channels: 2,
        output_channels: 0,
        supported_sample_rates: vec![48_000],
        is_default_input: true,
        is_default_output: false,
    });
    let routes = client.engine().list_routes();
    assert_eq!(
        routes[0].state,
        RouteState::DisabledByDevice,
        "reconnect alone must not re-enable a route"
    );
}

#[tokio::test]
async fn gain_change_is_applied_on_the_next_render() {
    let client = started_client();
    client
        .send(EngineCommand::AddRoute(plain_route(
            "r1", "in-1", 1, Some(2), 0.5,
        )))
        .unwrap();
    let ring = client.engine().input_ring("in-1").unwrap();
    ring.write(&[&[1.0_f32; 4], &[1.0_f32; 4]], 4);

    let (out_l, _) = render(&client, 4);
    assert!(out_l.iter().all(|&s| (s - 0.5).abs() < 1e-6));

    match client
        .send(EngineCommand::SetRouteGain {
            id: "r1".into(),
            gain: 1.0,
        })
        .unwrap()
    {
        EngineResponse::Routes(routes) => assert_eq!(routes[0].gain, 1.0),
        other => panic!("unexpected response {other:?}"),
    }

    ring.write(&[&[1.0_f32; 4], &[1.0_f32; 4]], 4);
    let (out_l, _) = render(&client, 4);
    assert!(out_l.iter().all(|&s| (s - 1.0).abs() < 1e-6));
}

#[tokio::test]
async fn invalid_channel_is_rejected_before_it_reaches_the_route_table() {
    let client = started_client();
    let err = client
        .send(EngineCommand::AddRoute(plain_route(
            "bad", "in-1", 9, Some(2), 1.0,
        )))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInputChannel { .. }));
    assert!(client.engine().list_routes().is_empty());
}

#[tokio::test]
async fn route_ops_fail_with_no_session_before_start_session() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = patchbay_engine::init_with_host(FakeHost::new());
    let err = client
        .send(EngineCommand::AddRoute(plain_route(
            "r1", "in-1", 1, Some(2), 1.0,
        )))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSession));
}

//! Production [`HostAudioApi`] backed by `cpal` (spec §6 "Host audio API
//! contract").
//!
//! Grounded on `poodle64-thoth`'s `audio/device.rs` (device enumeration
//! and default-device lookup) and `audio/capture.rs` (driving a `cpal`
//! input stream from a plain closure). `cpal` only exposes stream
//! *configuration*, not persistent device properties the way CoreAudio or
//! ALSA's mixer controls do, so [`CpalHostAudioApi::set_sample_rate`] and
//! [`CpalHostAudioApi::set_buffer_frames`] validate the request against
//! what the device reports and cache it; the cached value is applied the
//! next time a stream for that device is opened, not to hardware already
//! running.

use std::collections::HashMap;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::error;

use crate::config;
use crate::device::{
    AudioInputStream, AudioOutputStream, DefaultDevices, DeviceDescriptor, HostAudioApi,
    StreamConfig,
};
use crate::error::EngineError;

const MAX_CPAL_CHANNELS: usize = 8;

#[derive(Default, Clone, Copy)]
struct PendingConfig {
    sample_rate: Option<u32>,
    buffer_frames: Option<u32>,
}

pub struct CpalHostAudioApi {
    host: cpal::Host,
    pending: Mutex<HashMap<String, PendingConfig>>,
}

impl Default for CpalHostAudioApi {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalHostAudioApi {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn find_input(&self, uid: &str) -> Option<cpal::Device> {
        self.host
            .input_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == uid).unwrap_or(false))
    }

    fn find_output(&self, uid: &str) -> Option<cpal::Device> {
        self.host
            .output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == uid).unwrap_or(false))
    }

    fn find_any(&self, uid: &str) -> Option<cpal::Device> {
        self.find_input(uid).or_else(|| self.find_output(uid))
    }

    fn pending_for(&self, uid: &str) -> PendingConfig {
        self.pending.lock().get(uid).copied().unwrap_or_default()
    }

    fn resolved_sample_rate(&self, uid: &str, nominal: u32) -> u32 {
        self.pending_for(uid).sample_rate.unwrap_or(nominal)
    }

    fn resolved_buffer_frames(&self, uid: &str, nominal: u32) -> u32 {
        self.pending_for(uid).buffer_frames.unwrap_or(nominal)
    }
}

fn device_supports_rate(device: &cpal::Device, input: bool, rate: u32) -> bool {
    let ranges = if input {
        device.supported_input_configs().map(|it| it.collect::<Vec<_>>())
    } else {
        device.supported_output_configs().map(|it| it.collect::<Vec<_>>())
    };
    ranges
        .map(|ranges| {
            ranges.iter().any(|r| {
                rate >= r.min_sample_rate().0 && rate <= r.max_sample_rate().0
            })
        })
        .unwrap_or(false)
}

fn supported_rates(device: &cpal::Device, input: bool) -> Vec<u32> {
    let ranges = if input {
        device.supported_input_configs().map(|it| it.collect::<Vec<_>>())
    } else {
        device.supported_output_configs().map(|it| it.collect::<Vec<_>>())
    };
    let mut rates: Vec<u32> = ranges
        .map(|ranges| {
            ranges
                .iter()
                .flat_map(|r| [r.min_sample_rate().0, r.max_sample_rate().0])
                .collect()
        })
        .unwrap_or_default();
    rates.sort_unstable();
    rates.dedup();
    rates
}

impl HostAudioApi for CpalHostAudioApi {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let default_in = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_out = self.host.default_output_device().and_then(|d| d.name().ok());
        let mut by_name: HashMap<String, DeviceDescriptor> = HashMap::new();

        if let Ok(devices) = self.host.input_devices() {
            for device in devices {
                let Ok(name) = device.name() else { continue };
                let channels = device
                    .default_input_config()
                    .map(|c| c.channels() as usize)
                    .unwrap_or(0);
                let rates = supported_rates(&device, true);
                let entry = by_name.entry(name.clone()).or_insert_with(|| DeviceDescriptor {
                    uid: name.clone(),
                    name: name.clone(),
                    input_channels: 0,
                    output_channels: 0,
                    supported_sample_rates: Vec::new(),
                    is_default_input: false,
                    is_default_output: false,
                });
                entry.input_channels = channels;
                entry.supported_sample_rates = rates;
                entry.is_default_input = default_in.as_deref() == Some(name.as_str());
            }
        }
        if let Ok(devices) = self.host.output_devices() {
            for device in devices {
                let Ok(name) = device.name() else { continue };
                let channels = device
                    .default_output_config()
                    .map(|c| c.channels() as usize)
                    .unwrap_or(0);
                let rates = supported_rates(&device, false);
                let entry = by_name.entry(name.clone()).or_insert_with(|| DeviceDescriptor {
                    uid: name.clone(),
                    name: name.clone(),
                    input_channels: 0,
                    output_channels: 0,
                    supported_sample_rates: Vec::new(),
                    is_default_input: false,
                    is_default_output: false,
                });
                entry.output_channels = channels;
                if entry.supported_sample_rates.is_empty() {
                    entry.supported_sample_rates = rates;
                }
                entry.is_default_output = default_out.as_deref() == Some(name.as_str());
            }
        }
        by_name.into_values().collect()
    }

    fn default_devices(&self) -> DefaultDevices {
        DefaultDevices {
            input_uid: self.host.default_input_device().and_then(|d| d.name().ok()),
            output_uid: self.host.default_output_device().and_then(|d| d.name().ok()),
        }
    }

    fn set_sample_rate(&self, uid: &str, rate: u32) -> Result<u32, EngineError> {
        let device = self
            .find_any(uid)
            .ok_or_else(|| EngineError::DeviceNotFound(uid.to_string()))?;
        let input = self.find_input(uid).is_some();
        if !device_supports_rate(&device, input, rate) {
            return Err(EngineError::SampleRateNotSupported {
                uid: uid.to_string(),
                rate,
            });
        }
        self.pending.lock().entry(uid.to_string()).or_default().sample_rate = Some(rate);
        Ok(rate)
    }

    fn set_buffer_frames(&self, uid: &str, frames: u32) -> Result<u32, EngineError> {
        if self.find_any(uid).is_none() {
            return Err(EngineError::DeviceNotFound(uid.to_string()));
        }
        self.pending.lock().entry(uid.to_string()).or_default().buffer_frames = Some(frames);
        Ok(frames)
    }

    fn open_input_stream(
        &self,
        uid: &str,
        config: StreamConfig,
        mut on_data: Box<dyn FnMut(&[&[f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioInputStream>, EngineError> {
        let device = self
            .find_input(uid)
            .ok_or_else(|| EngineError::DeviceNotFound(uid.to_string()))?;
        let channel_count = config.channels.min(MAX_CPAL_CHANNELS);
        let sample_rate = self.resolved_sample_rate(uid, config.sample_rate);
        let buffer_frames = self.resolved_buffer_frames(uid, config.buffer_frames);

        let stream_config = cpal::StreamConfig {
            channels: channel_count as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_frames),
        };

        let mut scratch: Vec<Vec<f32>> =
            vec![vec![0.0_f32; crate::config::MAX_RENDER_BLOCK_FRAMES]; channel_count];

        let uid_owned = uid.to_string();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let frames = (data.len() / channel_count).min(config::MAX_RENDER_BLOCK_FRAMES);
                    for frame in 0..frames {
                        for ch in 0..channel_count {
                            scratch[ch][frame] = data[frame * channel_count + ch];
                        }
                    }
                    let mut refs: [&[f32]; MAX_CPAL_CHANNELS] = [&[]; MAX_CPAL_CHANNELS];
                    for (ch, slot) in refs.iter_mut().enumerate().take(channel_count) {
                        *slot = &scratch[ch][..frames];
                    }
                    on_data(&refs[..channel_count], frames);
                },
                move |err| error!(device = %uid_owned, %err, "input stream error"),
                None,
            )
            .map_err(|_| EngineError::InputStartFailed(uid.to_string()))?;
        stream
            .play()
            .map_err(|_| EngineError::InputStartFailed(uid.to_string()))?;
        Ok(Box::new(CpalInputStream { stream }))
    }

    fn open_output_stream(
        &self,
        uid: &str,
        config: StreamConfig,
        mut render: Box<dyn FnMut(&mut [&mut [f32]], usize) + Send>,
    ) -> Result<Box<dyn AudioOutputStream>, EngineError> {
        let device = self
            .find_output(uid)
            .ok_or_else(|| EngineError::DeviceNotFound(uid.to_string()))?;
        let channel_count = config.channels.min(MAX_CPAL_CHANNELS);
        let sample_rate = self.resolved_sample_rate(uid, config.sample_rate);
        let buffer_frames = self.resolved_buffer_frames(uid, config.buffer_frames);

        let stream_config = cpal::StreamConfig {
            channels: channel_count as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_frames),
        };

        let mut scratch: Vec<Vec<f32>> =
            vec![vec![0.0_f32; crate::config::MAX_RENDER_BLOCK_FRAMES]; channel_count];
        let mut refs_buf: Vec<&mut [f32]> = Vec::with_capacity(channel_count);

        let uid_owned = uid.to_string();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    let frames = (data.len() / channel_count).min(config::MAX_RENDER_BLOCK_FRAMES);
                    refs_buf.clear();
                    for channel in scratch.iter_mut() {
                        refs_buf.push(&mut channel[..frames]);
                    }
                    render(&mut refs_buf, frames);
                    for frame in 0..frames {
                        for ch in 0..channel_count {
                            data[frame * channel_count + ch] = refs_buf[ch][frame];
                        }
                    }
                },
                move |err| error!(device = %uid_owned, %err, "output stream error"),
                None,
            )
            .map_err(|_| EngineError::OutputStartFailed(uid.to_string()))?;
        stream
            .play()
            .map_err(|_| EngineError::OutputStartFailed(uid.to_string()))?;
        Ok(Box::new(CpalOutputStream { stream }))
    }
}

struct CpalInputStream {
    stream: cpal::Stream,
}

impl AudioInputStream for CpalInputStream {
    fn stop(&mut self) {
        let _ = self.stream.pause();
    }
}

struct CpalOutputStream {
    stream: cpal::Stream,
}

impl AudioOutputStream for CpalOutputStream {
    fn stop(&mut self) {
        let _ = self.stream.pause();
    }
}

// cpal::Stream is not Send on some backends; the engine only ever calls
// `stop()` from the control domain, and the stream itself manages its own
// realtime thread internally once built.
unsafe impl Send for CpalInputStream {}
unsafe impl Send for CpalOutputStream {}

//! cpal hardware backend
//!
//! cpal drives devices through callbacks; the streaming tasks want blocking
//! reads and writes. Each endpoint bridges the two with a ring of f32
//! samples: playback writes fill the ring the output callback drains, the
//! input callback fills the ring capture reads drain. A starved output
//! callback is reported as an underrun, a full input ring as an overrun.

use crate::audio::endpoint::{
    default_period_frames, Direction, EndpointError, Negotiated, PcmBackend, PcmEndpoint,
    StreamParams, Transfer, MAX_WAIT,
};
use crate::audio::pcm::SampleDepth;
use crate::config::DeviceSpec;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ring length in seconds of audio
const RING_SECONDS: f64 = 0.5;

/// Backend over a cpal host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Backend on the platform's default host
    pub fn new() -> Self {
        Self
    }

    fn host(&self) -> Result<Host, EndpointError> {
        Ok(cpal::default_host())
    }

    /// Names of the devices available in `direction`
    pub fn device_names(&self, direction: Direction) -> Result<Vec<String>, EndpointError> {
        Ok(list_devices(&self.host()?, direction)?
            .iter()
            .filter_map(|d| d.name().ok())
            .collect())
    }
}

fn list_devices(host: &Host, direction: Direction) -> Result<Vec<Device>, EndpointError> {
    let devices = match direction {
        Direction::Playback => host.output_devices().map(|d| d.collect()),
        Direction::Capture => host.input_devices().map(|d| d.collect()),
    };
    devices.map_err(|e| EndpointError::Device(e.to_string()))
}

/// Pick a device by exact name, then by card index, else the default
fn select_device(
    host: &Host,
    direction: Direction,
    spec: Option<&DeviceSpec>,
) -> Result<Device, EndpointError> {
    let default = || match direction {
        Direction::Playback => host.default_output_device(),
        Direction::Capture => host.default_input_device(),
    };

    let Some(spec) = spec else {
        return default().ok_or(EndpointError::NoDevice { direction });
    };
    if spec.name == "default" {
        return default().ok_or(EndpointError::NoDevice { direction });
    }

    let mut devices = list_devices(host, direction)?;
    if let Some(pos) = devices
        .iter()
        .position(|d| d.name().map(|n| n == spec.name).unwrap_or(false))
    {
        return Ok(devices.swap_remove(pos));
    }

    if let Some(card) = spec.card {
        if spec.device.is_some() {
            tracing::debug!(selector = %spec, "Sub-device index ignored by cpal");
        }
        if (card as usize) < devices.len() {
            return Ok(devices.swap_remove(card as usize));
        }
    }

    Err(EndpointError::DeviceNotFound {
        direction,
        name: spec.name.clone(),
    })
}

impl PcmBackend for CpalBackend {
    type Endpoint = CpalEndpoint;

    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        direction: Direction,
        device: Option<&DeviceSpec>,
    ) -> Result<Self::Endpoint, EndpointError> {
        let host = self.host()?;
        let device = select_device(&host, direction, device)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!(%direction, device = %name, host = ?host.id(), "Device opened");

        Ok(CpalEndpoint {
            direction,
            device,
            name,
            stream: None,
            producer: None,
            consumer: None,
            flags: Arc::new(StreamFlags::default()),
            params: None,
            negotiated: None,
            scratch: Vec::new(),
        })
    }
}

/// State shared with the audio callback
#[derive(Default)]
struct StreamFlags {
    /// Playback has queued audio at least once
    primed: AtomicBool,
    /// Underrun (playback) or overrun (capture) since the last check
    xrun: AtomicBool,
    /// The stream reported an error
    failed: AtomicBool,
}

/// One open cpal stream
pub struct CpalEndpoint {
    direction: Direction,
    device: Device,
    name: String,
    stream: Option<Stream>,
    producer: Option<HeapProd<f32>>,
    consumer: Option<HeapCons<f32>>,
    flags: Arc<StreamFlags>,
    params: Option<StreamParams>,
    negotiated: Option<Negotiated>,
    scratch: Vec<f32>,
}

impl CpalEndpoint {
    /// Supported rate closest to `requested` for an f32 stream of `channels`
    fn nearest_rate(&self, requested: u32, channels: u16) -> Result<u32, EndpointError> {
        let ranges: Vec<_> = match self.direction {
            Direction::Playback => self
                .device
                .supported_output_configs()
                .map(|c| c.collect())
                .map_err(|e| EndpointError::Negotiate(e.to_string()))?,
            Direction::Capture => self
                .device
                .supported_input_configs()
                .map(|c| c.collect())
                .map_err(|e| EndpointError::Negotiate(e.to_string()))?,
        };

        ranges
            .iter()
            .filter(|r| r.channels() == channels && r.sample_format() == SampleFormat::F32)
            .map(|r| requested.clamp(r.min_sample_rate().0, r.max_sample_rate().0))
            .min_by_key(|rate| rate.abs_diff(requested))
            .ok_or_else(|| {
                EndpointError::Negotiate(format!(
                    "{} has no f32 {} configuration with {} channels",
                    self.name, self.direction, channels
                ))
            })
    }

    fn build_stream(&mut self, config: &StreamConfig) -> Result<Stream, EndpointError> {
        let capacity = (config.sample_rate.0 as f64 * RING_SECONDS) as usize * config.channels as usize;
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1024)).split();
        let flags = Arc::clone(&self.flags);
        let error_flags = Arc::clone(&self.flags);
        let direction = self.direction;
        let on_error = move |err: cpal::StreamError| {
            tracing::error!(%direction, error = %err, "Stream error");
            error_flags.failed.store(true, Ordering::Release);
        };

        let stream = match self.direction {
            Direction::Playback => {
                let mut ring = consumer;
                self.producer = Some(producer);
                self.device.build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let popped = ring.pop_slice(data);
                        if popped < data.len() {
                            data[popped..].fill(0.0);
                            if flags.primed.load(Ordering::Relaxed) {
                                flags.xrun.store(true, Ordering::Release);
                            }
                        }
                    },
                    on_error,
                    None,
                )
            }
            Direction::Capture => {
                let mut ring = producer;
                self.consumer = Some(consumer);
                self.device.build_input_stream(
                    config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if ring.push_slice(data) < data.len() {
                            flags.xrun.store(true, Ordering::Release);
                        }
                    },
                    on_error,
                    None,
                )
            }
        };
        stream.map_err(|e| EndpointError::Open {
            direction: self.direction,
            reason: e.to_string(),
        })
    }

    fn check_stream(&self) -> Result<(StreamParams, Negotiated), EndpointError> {
        if self.flags.failed.load(Ordering::Acquire) {
            return Err(EndpointError::Device(format!("{} stream failed", self.name)));
        }
        match (self.params, self.negotiated) {
            (Some(p), Some(n)) => Ok((p, n)),
            _ => Err(EndpointError::NotNegotiated),
        }
    }

    fn period_duration(&self) -> Duration {
        self.negotiated
            .map(|n| Duration::from_secs_f64(n.period_frames as f64 / n.sample_rate as f64))
            .unwrap_or(Duration::from_millis(10))
    }
}

fn to_float(depth: SampleDepth, bytes: &[u8]) -> f32 {
    (depth.decode(bytes) as f64 / depth.full_scale()) as f32
}

fn from_float(depth: SampleDepth, value: f32, out: &mut [u8]) {
    let scaled = (value as f64 * depth.full_scale()).round();
    depth.encode(scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32, out);
}

impl PcmEndpoint for CpalEndpoint {
    fn negotiate(&mut self, params: &StreamParams) -> Result<Negotiated, EndpointError> {
        let rate = self.nearest_rate(params.sample_rate, params.channels)?;
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = self.build_stream(&config)?;
        stream.play().map_err(|e| EndpointError::Open {
            direction: self.direction,
            reason: e.to_string(),
        })?;
        self.stream = Some(stream);

        let negotiated = Negotiated {
            sample_rate: rate,
            period_frames: default_period_frames(rate),
        };
        self.params = Some(*params);
        self.negotiated = Some(negotiated);
        if rate != params.sample_rate {
            tracing::warn!(requested = params.sample_rate, actual = rate, "Sample rate adjusted");
        }
        Ok(negotiated)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<Transfer, EndpointError> {
        let (params, _) = self.check_stream()?;
        if self.flags.xrun.swap(false, Ordering::AcqRel) {
            return Ok(Transfer::Xrun);
        }
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| EndpointError::Device("write on a capture endpoint".into()))?;

        let channels = params.channels as usize;
        let count = frames.min(producer.vacant_len() / channels);
        if count == 0 {
            return Ok(Transfer::WouldBlock);
        }

        let width = params.depth.bytes();
        self.scratch.clear();
        self.scratch.extend(
            data[..count * params.frame_size()]
                .chunks_exact(width)
                .map(|s| to_float(params.depth, s)),
        );
        producer.push_slice(&self.scratch);
        self.flags.primed.store(true, Ordering::Relaxed);
        Ok(Transfer::Frames(count))
    }

    fn read(&mut self, data: &mut [u8], frames: usize) -> Result<Transfer, EndpointError> {
        let (params, _) = self.check_stream()?;
        if self.flags.xrun.swap(false, Ordering::AcqRel) {
            return Ok(Transfer::Xrun);
        }
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| EndpointError::Device("read on a playback endpoint".into()))?;

        let channels = params.channels as usize;
        let count = frames.min(consumer.occupied_len() / channels);
        if count == 0 {
            return Ok(Transfer::WouldBlock);
        }

        self.scratch.resize(count * channels, 0.0);
        let popped = consumer.pop_slice(&mut self.scratch);
        let width = params.depth.bytes();
        for (sample, out) in self.scratch[..popped]
            .iter()
            .zip(data.chunks_exact_mut(width))
        {
            from_float(params.depth, *sample, out);
        }
        Ok(Transfer::Frames(popped / channels))
    }

    fn wait(&mut self, timeout: Duration) {
        std::thread::sleep(self.period_duration().min(timeout).max(Duration::from_millis(1)));
    }

    fn recover(&mut self) -> Result<(), EndpointError> {
        self.flags.xrun.store(false, Ordering::Release);
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.clear();
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), EndpointError> {
        let Some(producer) = self.producer.as_ref() else {
            return Ok(());
        };
        let deadline = Instant::now() + Duration::from_secs_f64(RING_SECONDS) + MAX_WAIT;
        while producer.occupied_len() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // The device still holds its own hardware buffer
        std::thread::sleep(self.period_duration() * 2);
        Ok(())
    }
}

impl Drop for CpalEndpoint {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "Stream pause on close failed");
            }
        }
        tracing::info!(direction = %self.direction, device = %self.name, "Device closed");
    }
}

//! Software loopback backend
//!
//! A virtual cable: whatever the playback endpoint writes, the capture
//! endpoint reads back. Playback is paced by a sample clock the way a real
//! DAC would consume it, and audio played while no capture endpoint is open
//! is lost, just as it would be on hardware. A capture endpoint with no
//! playback attached records silence at the sample clock.
//!
//! The backend counts opened and closed endpoints so callers can verify that
//! every endpoint is released exactly once.

use crate::audio::endpoint::{
    default_period_frames, Direction, EndpointError, Negotiated, PcmBackend, PcmEndpoint,
    StreamParams, Transfer,
};
use crate::config::DeviceSpec;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cable capacity in bytes
const CABLE_CAPACITY: usize = 1 << 20;

/// Periods of audio the simulated hardware buffer holds
const BUFFER_PERIODS: u64 = 4;

/// Ring halves waiting for an endpoint to claim them
struct Cable {
    producer: Option<HeapProd<u8>>,
    consumer: Option<HeapCons<u8>>,
}

struct Shared {
    cable: Mutex<Cable>,
    capture_attached: AtomicBool,
    playback_attached: AtomicBool,
    overrun: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-process loopback cable backend
#[derive(Clone)]
pub struct VirtualLoopback {
    shared: Arc<Shared>,
    speed: f64,
    muted: bool,
    native_rate: Option<u32>,
    fail_open: Option<Direction>,
}

impl VirtualLoopback {
    /// Create a cable running at real-time speed
    pub fn new() -> Self {
        let (producer, consumer) = HeapRb::<u8>::new(CABLE_CAPACITY).split();
        Self {
            shared: Arc::new(Shared {
                cable: Mutex::new(Cable {
                    producer: Some(producer),
                    consumer: Some(consumer),
                }),
                capture_attached: AtomicBool::new(false),
                playback_attached: AtomicBool::new(false),
                overrun: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
            speed: 1.0,
            muted: false,
            native_rate: None,
            fail_open: None,
        }
    }

    /// Run the sample clock `speed` times faster than real time
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.01);
        self
    }

    /// Deliver silence to the capture side instead of the played audio
    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    /// Grant this rate on negotiation regardless of the request
    pub fn with_native_rate(mut self, rate: u32) -> Self {
        self.native_rate = Some(rate);
        self
    }

    /// Make opening an endpoint in `direction` fail
    pub fn failing_open(mut self, direction: Direction) -> Self {
        self.fail_open = Some(direction);
        self
    }

    /// Endpoints opened so far
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Endpoints closed so far
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Endpoints currently open
    pub fn open_endpoints(&self) -> usize {
        self.opened() - self.closed()
    }
}

impl Default for VirtualLoopback {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmBackend for VirtualLoopback {
    type Endpoint = VirtualEndpoint;

    fn name(&self) -> &'static str {
        "virtual"
    }

    fn open(
        &self,
        direction: Direction,
        _device: Option<&DeviceSpec>,
    ) -> Result<Self::Endpoint, EndpointError> {
        if self.fail_open == Some(direction) {
            return Err(EndpointError::Open {
                direction,
                reason: "injected failure".into(),
            });
        }

        let mut cable = self
            .shared
            .cable
            .lock()
            .map_err(|_| EndpointError::Device("cable lock poisoned".into()))?;
        let busy = || EndpointError::Open {
            direction,
            reason: "device busy".into(),
        };

        let (producer, consumer) = match direction {
            Direction::Playback => {
                let producer = cable.producer.take().ok_or_else(busy)?;
                self.shared.playback_attached.store(true, Ordering::SeqCst);
                (Some(producer), None)
            }
            Direction::Capture => {
                let mut consumer = cable.consumer.take().ok_or_else(busy)?;
                // Audio played before capture started is gone
                consumer.clear();
                self.shared.overrun.store(false, Ordering::SeqCst);
                self.shared.capture_attached.store(true, Ordering::SeqCst);
                (None, Some(consumer))
            }
        };
        drop(cable);

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%direction, "Virtual endpoint opened");

        Ok(VirtualEndpoint {
            direction,
            shared: Arc::clone(&self.shared),
            producer,
            consumer,
            speed: self.speed,
            muted: self.muted,
            native_rate: self.native_rate,
            params: None,
            clock: None,
            frames_moved: 0,
            scratch: Vec::new(),
        })
    }
}

/// One direction of the virtual cable
pub struct VirtualEndpoint {
    direction: Direction,
    shared: Arc<Shared>,
    producer: Option<HeapProd<u8>>,
    consumer: Option<HeapCons<u8>>,
    speed: f64,
    muted: bool,
    native_rate: Option<u32>,
    params: Option<(StreamParams, Negotiated)>,
    /// Start of the sample clock, set by the first transfer
    clock: Option<Instant>,
    /// Frames moved since the clock started
    frames_moved: u64,
    scratch: Vec<u8>,
}

impl VirtualEndpoint {
    fn negotiated(&self) -> Result<(StreamParams, Negotiated), EndpointError> {
        self.params.ok_or(EndpointError::NotNegotiated)
    }

    /// Frames the simulated DAC has consumed since the clock started
    fn frames_played(&self, rate: u32) -> u64 {
        self.clock
            .map(|start| (start.elapsed().as_secs_f64() * rate as f64 * self.speed) as u64)
            .unwrap_or(0)
    }

    fn period_duration(&self) -> Duration {
        match self.params {
            Some((_, n)) => Duration::from_secs_f64(
                n.period_frames as f64 / n.sample_rate as f64 / self.speed,
            ),
            None => Duration::from_millis(10),
        }
    }

    /// Zero frames due by the clock, as an idle input records
    fn silence(&mut self, data: &mut [u8], frames: usize, frame_size: usize, rate: u32) -> Transfer {
        let due = self.frames_played(rate).saturating_sub(self.frames_moved);
        let count = (due as usize).min(frames);
        if count == 0 {
            return Transfer::WouldBlock;
        }
        data[..count * frame_size].fill(0);
        self.frames_moved += count as u64;
        Transfer::Frames(count)
    }

    fn deliver(&mut self, data: &[u8], frame_size: usize) {
        if !self.shared.capture_attached.load(Ordering::SeqCst) {
            return;
        }
        let Some(producer) = self.producer.as_mut() else {
            return;
        };

        let payload = if self.muted {
            self.scratch.clear();
            self.scratch.resize(data.len(), 0);
            &self.scratch[..]
        } else {
            data
        };

        let room = producer.vacant_len() / frame_size * frame_size;
        if room < payload.len() {
            self.shared.overrun.store(true, Ordering::SeqCst);
        }
        producer.push_slice(&payload[..room.min(payload.len())]);
    }
}

impl PcmEndpoint for VirtualEndpoint {
    fn negotiate(&mut self, params: &StreamParams) -> Result<Negotiated, EndpointError> {
        let sample_rate = self.native_rate.unwrap_or(params.sample_rate);
        let negotiated = Negotiated {
            sample_rate,
            period_frames: default_period_frames(sample_rate),
        };
        self.params = Some((*params, negotiated));
        Ok(negotiated)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<Transfer, EndpointError> {
        if self.direction != Direction::Playback {
            return Err(EndpointError::Device("write on a capture endpoint".into()));
        }
        let (params, negotiated) = self.negotiated()?;
        let frame_size = params.frame_size();
        let rate = negotiated.sample_rate;

        if self.clock.is_none() {
            self.clock = Some(Instant::now());
        }
        let played = self.frames_played(rate);
        if self.frames_moved > 0 && played > self.frames_moved {
            return Ok(Transfer::Xrun);
        }

        let buffer_frames = negotiated.period_frames as u64 * BUFFER_PERIODS;
        let budget = (played + buffer_frames).saturating_sub(self.frames_moved);
        if budget == 0 {
            return Ok(Transfer::WouldBlock);
        }

        let accepted = (frames as u64).min(budget) as usize;
        self.deliver(&data[..accepted * frame_size], frame_size);
        self.frames_moved += accepted as u64;
        Ok(Transfer::Frames(accepted))
    }

    fn read(&mut self, data: &mut [u8], frames: usize) -> Result<Transfer, EndpointError> {
        let (params, negotiated) = self.negotiated()?;
        let frame_size = params.frame_size();
        if self.clock.is_none() {
            self.clock = Some(Instant::now());
        }
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| EndpointError::Device("read on a playback endpoint".into()))?;

        if self.shared.overrun.load(Ordering::SeqCst) {
            return Ok(Transfer::Xrun);
        }

        let available = consumer.occupied_len() / frame_size;
        if available == 0 {
            if self.shared.playback_attached.load(Ordering::SeqCst) {
                return Ok(Transfer::WouldBlock);
            }
            return Ok(self.silence(data, frames, frame_size, negotiated.sample_rate));
        }
        let count = available.min(frames);
        let popped = consumer.pop_slice(&mut data[..count * frame_size]);
        self.frames_moved += (popped / frame_size) as u64;
        Ok(Transfer::Frames(popped / frame_size))
    }

    fn wait(&mut self, timeout: Duration) {
        let nap = self
            .period_duration()
            .min(timeout)
            .max(Duration::from_millis(1));
        std::thread::sleep(nap);
    }

    fn recover(&mut self) -> Result<(), EndpointError> {
        match self.direction {
            Direction::Playback => {
                // Restart the clock, as a re-prepared device would
                self.clock = None;
                self.frames_moved = 0;
            }
            Direction::Capture => {
                if let Some(consumer) = self.consumer.as_mut() {
                    consumer.clear();
                }
                self.shared.overrun.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), EndpointError> {
        let Ok((_, negotiated)) = self.negotiated() else {
            return Ok(());
        };
        if self.direction != Direction::Playback {
            return Ok(());
        }

        // Let the simulated DAC play what is queued
        let queued = self
            .frames_moved
            .saturating_sub(self.frames_played(negotiated.sample_rate));
        std::thread::sleep(Duration::from_secs_f64(
            queued as f64 / negotiated.sample_rate as f64 / self.speed,
        ));

        // Then give an attached capture a bounded chance to pick it up
        let deadline = Instant::now() + crate::audio::endpoint::MAX_WAIT;
        while Instant::now() < deadline {
            let pending = self
                .producer
                .as_ref()
                .map(|p| p.occupied_len())
                .unwrap_or(0);
            if pending == 0 || !self.shared.capture_attached.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl Drop for VirtualEndpoint {
    fn drop(&mut self) {
        if let Ok(mut cable) = self.shared.cable.lock() {
            if let Some(producer) = self.producer.take() {
                cable.producer = Some(producer);
                self.shared.playback_attached.store(false, Ordering::SeqCst);
            }
            if let Some(consumer) = self.consumer.take() {
                cable.consumer = Some(consumer);
                self.shared.capture_attached.store(false, Ordering::SeqCst);
            }
        }
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(direction = %self.direction, "Virtual endpoint closed");
    }
}

use chrono::Local;
use statum::{machine, state};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, EventBus};
use crate::capture::device::{DeviceCapability, DeviceError};
use crate::event::{self, InputEvent, SessionClock, DEFAULT_DEADZONE};

/// Settings for the capture polling loop.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Stick deadzone as a fraction (0.0-1.0).
    pub deadzone: f32,

    /// Idle sleep between device polls, in microseconds.
    pub poll_interval_us: u64,

    /// How many consecutive transient read errors to retry before the
    /// device is treated as disconnected.
    pub max_retries: u32,

    /// First retry delay; doubles per consecutive failure.
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay.
    pub retry_max_delay_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
            poll_interval_us: 250,
            max_retries: 5,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Capture errors.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to initialize capture source: {0}")]
    Initialization(String),
}

/// Result of one capture poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourcePoll {
    /// A normalized event, in device order.
    Event(InputEvent),
    /// Nothing pending; caller may sleep one poll interval.
    Idle,
    /// A transient read error was absorbed; caller should back off
    /// for the given delay before polling again.
    Backoff(Duration),
    /// The device is gone. Terminal.
    Disconnected,
}

#[state]
#[derive(Debug, Clone)]
pub enum CaptureState {
    Initializing,
    Capturing,
}

#[machine]
pub struct CaptureSource<S: CaptureState> {
    device: Box<dyn DeviceCapability>,
    clock: SessionClock,
    settings: CaptureSettings,
    retries: u32,
    last_timestamp: Duration,
}

impl<S: CaptureState> CaptureSource<S> {
    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }
}

impl CaptureSource<Initializing> {
    pub fn create(
        device: Box<dyn DeviceCapability>,
        clock: SessionClock,
        settings: Option<CaptureSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating capture source with settings: {:?}", settings);
        Self::new(device, clock, settings, 0, Duration::ZERO)
    }

    /// Finish setup and transition to the polling state.
    pub fn initialize(self) -> Result<CaptureSource<Capturing>, CaptureError> {
        info!(
            "Capture source initialized for device '{}' (deadzone {})",
            self.device.name(),
            self.settings.deadzone
        );
        Ok(self.transition())
    }
}

impl CaptureSource<Capturing> {
    /// Poll the device once.
    ///
    /// Events come out in exactly the order the device produced them.
    /// Transient errors are retried with exponential backoff up to the
    /// configured bound, then escalated to [`SourcePoll::Disconnected`].
    pub fn poll_next(&mut self) -> SourcePoll {
        match self.device.poll() {
            Ok(Some(sample)) => {
                self.retries = 0;
                let value = event::normalize(&sample, self.settings.deadzone);
                // Timestamps must never run backwards within a session.
                let timestamp = self.clock.now().max(self.last_timestamp);
                self.last_timestamp = timestamp;

                let input = InputEvent {
                    timestamp,
                    channel: sample.channel,
                    value,
                };
                debug!("Captured event: {:?}", input);
                SourcePoll::Event(input)
            }
            Ok(None) => {
                self.retries = 0;
                SourcePoll::Idle
            }
            Err(DeviceError::Disconnected) => {
                warn!("Device '{}' disconnected", self.device.name());
                SourcePoll::Disconnected
            }
            Err(err) => {
                self.retries += 1;
                if self.retries > self.settings.max_retries {
                    error!(
                        "Device '{}' failed {} consecutive reads, treating as disconnected: {}",
                        self.device.name(),
                        self.retries,
                        err
                    );
                    SourcePoll::Disconnected
                } else {
                    let exponent = self.retries.saturating_sub(1).min(16);
                    let delay_ms = self
                        .settings
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << exponent)
                        .min(self.settings.retry_max_delay_ms);
                    warn!(
                        "Transient read error on '{}' (attempt {}/{}), retrying in {}ms: {}",
                        self.device.name(),
                        self.retries,
                        self.settings.max_retries,
                        delay_ms,
                        err
                    );
                    SourcePoll::Backoff(Duration::from_millis(delay_ms))
                }
            }
        }
    }
}

/// Handle for the capture task.
///
/// Spawns a dedicated tokio task that polls the device and publishes
/// every event to the bus. The task checks its cancellation token each
/// iteration, so shutdown is observed within one poll interval.
pub struct CaptureHandle {
    cancel: CancellationToken,
}

impl CaptureHandle {
    pub fn spawn(
        device: Box<dyn DeviceCapability>,
        settings: Option<CaptureSettings>,
        bus: EventBus,
        clock: SessionClock,
    ) -> Result<Self, CaptureError> {
        info!("Spawning capture task");
        let source = CaptureSource::create(device, clock, settings).initialize()?;

        let cancel = CancellationToken::new();
        let task_token = cancel.clone();
        tokio::spawn(async move {
            run_capture_loop(source, bus, task_token).await;
        });

        Ok(Self { cancel })
    }

    /// Ask the capture task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_capture_loop(
    mut source: CaptureSource<Capturing>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    let poll_interval = Duration::from_micros(source.settings().poll_interval_us);
    info!(
        "Starting capture loop (poll interval {}us)",
        source.settings().poll_interval_us
    );

    let mut event_count: u64 = 0;
    let mut last_log_time = Local::now();
    let log_interval = chrono::Duration::seconds(10);

    loop {
        if cancel.is_cancelled() {
            info!("Capture loop cancelled");
            break;
        }

        match source.poll_next() {
            SourcePoll::Event(input) => {
                bus.publish(BusMessage::Input(input));
                event_count += 1;
            }
            SourcePoll::Idle => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Capture loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            SourcePoll::Backoff(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Capture loop cancelled during backoff");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            SourcePoll::Disconnected => {
                warn!("Device disconnected, notifying all subscribers");
                bus.publish(BusMessage::Disconnected);
                break;
            }
        }

        let now = Local::now();
        if now - last_log_time > log_interval {
            info!(
                "Capture stats: {} events in last {} seconds (avg {:.2}/sec)",
                event_count,
                log_interval.num_seconds(),
                event_count as f64 / log_interval.num_seconds() as f64
            );
            event_count = 0;
            last_log_time = now;
        }
    }
}

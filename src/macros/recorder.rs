//! Macro recording from the live event stream.
//!
//! State machine `Idle -> Armed -> Idle`. While armed, every event off
//! the bus is appended with its offset relative to the first captured
//! event. One recorder guards one device: arming twice fails with
//! [`RecorderError::AlreadyRecording`] instead of forking the session.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, Subscription};
use crate::event::InputEvent;
use crate::macros::{Macro, MacroEvent};

/// Recorder errors. All recoverable at the caller.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("a recording session is already armed")]
    AlreadyRecording,

    #[error("no recording session is armed")]
    NotRecording,

    #[error("recording captured no events")]
    EmptyRecording,

    #[error("recorder task unavailable: {0}")]
    ChannelClosed(String),
}

/// Ephemeral per-recording state. `start` pins to the first event so
/// offsets begin at zero.
struct RecordingSession {
    start: Option<std::time::Duration>,
    events: Vec<MacroEvent>,
}

/// Arms on command and turns buffered events into a [`Macro`].
pub struct MacroRecorder {
    session: Option<RecordingSession>,
}

impl MacroRecorder {
    pub fn new() -> Self {
        Self { session: None }
    }

    pub fn is_armed(&self) -> bool {
        self.session.is_some()
    }

    /// Arm a new session. At most one session may be armed.
    pub fn start_recording(&mut self) -> Result<(), RecorderError> {
        if self.session.is_some() {
            warn!("start_recording while already armed");
            return Err(RecorderError::AlreadyRecording);
        }
        info!("Recording armed");
        self.session = Some(RecordingSession {
            start: None,
            events: Vec::new(),
        });
        Ok(())
    }

    /// Append a live event to the armed session. No-op when idle.
    pub fn handle_event(&mut self, event: &InputEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let start = *session.start.get_or_insert(event.timestamp);
        // Offsets never run backwards even if a misbehaving source
        // delivers a stale timestamp.
        let floor = session.events.last().map(|e| e.offset).unwrap_or_default();
        let offset = event.timestamp.saturating_sub(start).max(floor);
        debug!(
            "Recorded {:?} = {:.3} at offset {:?}",
            event.channel, event.value, offset
        );
        session.events.push(MacroEvent {
            offset,
            channel: event.channel,
            value: event.value,
        });
    }

    /// Disarm and produce the macro.
    ///
    /// An armed session with zero events fails with
    /// [`RecorderError::EmptyRecording`]; the caller decides whether
    /// that matters.
    pub fn stop_recording(&mut self) -> Result<Macro, RecorderError> {
        let session = self.session.take().ok_or(RecorderError::NotRecording)?;
        if session.events.is_empty() {
            warn!("Recording stopped with no captured events");
            return Err(RecorderError::EmptyRecording);
        }
        info!("Recording stopped with {} events", session.events.len());
        Ok(Macro::from_events(session.events).expect("recorded offsets are non-decreasing"))
    }

    /// Force-stop on device disconnect.
    ///
    /// Returns whatever was buffered, tagged truncated - even an empty
    /// session yields an (empty, truncated) macro so the caller can see
    /// the recording existed. `None` means nothing was armed.
    pub fn force_stop(&mut self) -> Option<Macro> {
        let session = self.session.take()?;
        let count = session.events.len();
        let mut result =
            Macro::from_events(session.events).expect("recorded offsets are non-decreasing");
        result.mark_truncated();
        warn!("Recording force-stopped with {} events (truncated)", count);
        Some(result)
    }
}

impl Default for MacroRecorder {
    fn default() -> Self {
        Self::new()
    }
}

enum RecorderCommand {
    Start {
        response_tx: oneshot::Sender<Result<(), RecorderError>>,
    },
    Stop {
        response_tx: oneshot::Sender<Result<Macro, RecorderError>>,
    },
}

/// Handle for the recorder task.
///
/// The task owns the [`MacroRecorder`] and drains a bus subscription;
/// commands arrive over a channel with oneshot replies. On a device
/// disconnect an armed session is force-stopped and the truncated macro
/// is delivered on the channel returned by [`spawn`](Self::spawn).
#[derive(Clone)]
pub struct RecorderHandle {
    command_tx: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    pub fn spawn(subscription: Subscription) -> (Self, mpsc::Receiver<Macro>) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (truncated_tx, truncated_rx) = mpsc::channel(4);

        info!("Spawning recorder task");
        tokio::spawn(async move {
            run_recorder_loop(MacroRecorder::new(), subscription, command_rx, truncated_tx).await;
        });

        (Self { command_tx }, truncated_rx)
    }

    pub async fn start_recording(&self) -> Result<(), RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(RecorderCommand::Start { response_tx })
            .await
            .map_err(|e| RecorderError::ChannelClosed(e.to_string()))?;
        response_rx
            .await
            .map_err(|e| RecorderError::ChannelClosed(e.to_string()))?
    }

    pub async fn stop_recording(&self) -> Result<Macro, RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(RecorderCommand::Stop { response_tx })
            .await
            .map_err(|e| RecorderError::ChannelClosed(e.to_string()))?;
        response_rx
            .await
            .map_err(|e| RecorderError::ChannelClosed(e.to_string()))?
    }
}

async fn run_recorder_loop(
    mut recorder: MacroRecorder,
    mut subscription: Subscription,
    mut command_rx: mpsc::Receiver<RecorderCommand>,
    truncated_tx: mpsc::Sender<Macro>,
) {
    loop {
        // Biased toward the bus so events already queued are recorded
        // before a racing stop command is answered.
        tokio::select! {
            biased;

            message = subscription.recv() => {
                match message {
                    Some(BusMessage::Input(event)) => recorder.handle_event(&event),
                    Some(BusMessage::Disconnected) => {
                        info!("Recorder received disconnect");
                        if let Some(truncated) = recorder.force_stop() {
                            if truncated_tx.send(truncated).await.is_err() {
                                warn!("Nobody listening for the truncated recording");
                            }
                        }
                        break;
                    }
                    None => {
                        debug!("Bus closed, stopping recorder task");
                        break;
                    }
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(RecorderCommand::Start { response_tx }) => {
                        if response_tx.send(recorder.start_recording()).is_err() {
                            error!("Recorder caller went away before start reply");
                        }
                    }
                    Some(RecorderCommand::Stop { response_tx }) => {
                        if response_tx.send(recorder.stop_recording()).is_err() {
                            error!("Recorder caller went away before stop reply");
                        }
                    }
                    None => {
                        debug!("Recorder handle dropped, stopping task");
                        break;
                    }
                }
            }
        }
    }
}

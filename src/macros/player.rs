//! Macro playback onto a virtual output sink.
//!
//! Playback runs in its own task with its own timer, independent of
//! live capture - recording and replay can overlap. Each event is due
//! at `playback_start + offset / speed`; events sharing an offset are
//! emitted in stored order. Cancellation is raced against the
//! inter-event sleep, so it is observed within one emission tick.
//!
//! The one hard rule here: [`VirtualOutputSink::reset_all`] runs on
//! *every* termination path - completion, cancellation, sink errors -
//! so partial playback can never leave a virtual button held down. If
//! the virtual device feeds back into the capture side as a physical
//! device, closing that loop is the operator's call, not this module's.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::macros::Macro;
use crate::sink::VirtualOutputSink;

/// Playback errors.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("invalid speed factor {0} (must be finite and > 0)")]
    InvalidSpeed(f64),
}

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
}

/// Handle to one running playback.
///
/// Dropping the session does not stop playback; call
/// [`cancel`](Self::cancel) for that. The playback task always resets
/// the sink before finishing, whatever the outcome.
pub struct PlaybackSession {
    cancel: CancellationToken,
    done: watch::Receiver<Option<PlaybackOutcome>>,
}

impl PlaybackSession {
    /// Stop emission. Observed within one event tick; the channel
    /// reset still runs. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait for the playback task to finish and report how it ended.
    pub async fn finished(&mut self) -> PlaybackOutcome {
        loop {
            if let Some(outcome) = *self.done.borrow() {
                return outcome;
            }
            if self.done.changed().await.is_err() {
                // Task ended without reporting; treat as cancelled.
                return (*self.done.borrow()).unwrap_or(PlaybackOutcome::Cancelled);
            }
        }
    }
}

/// Start replaying `sequence` onto `sink` at the given speed factor.
///
/// `speed` scales the recorded spacing: 2.0 plays in half the original
/// wall time, 0.5 in double. An empty macro completes immediately;
/// the reset still runs.
pub fn play(
    sequence: Arc<Macro>,
    sink: Box<dyn VirtualOutputSink>,
    speed: f64,
) -> Result<PlaybackSession, PlayerError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(PlayerError::InvalidSpeed(speed));
    }

    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(None);

    info!(
        "Starting playback: {} events over {:?} at {:.2}x{}",
        sequence.len(),
        sequence.total_duration(),
        speed,
        if sequence.is_truncated() {
            " (truncated recording)"
        } else {
            ""
        }
    );

    let task_token = cancel.clone();
    tokio::spawn(async move {
        run_playback(sequence, sink, speed, task_token, done_tx).await;
    });

    Ok(PlaybackSession {
        cancel,
        done: done_rx,
    })
}

async fn run_playback(
    sequence: Arc<Macro>,
    mut sink: Box<dyn VirtualOutputSink>,
    speed: f64,
    cancel: CancellationToken,
    done_tx: watch::Sender<Option<PlaybackOutcome>>,
) {
    let start = Instant::now();
    let mut outcome = PlaybackOutcome::Completed;
    let mut emitted: usize = 0;

    for event in sequence.events() {
        let deadline = start + event.offset.div_f64(speed);
        tokio::select! {
            // Cancellation wins over an already-due emission.
            biased;

            _ = cancel.cancelled() => {
                info!("Playback cancelled after {} of {} events", emitted, sequence.len());
                outcome = PlaybackOutcome::Cancelled;
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        match sink.apply(event.channel, event.value) {
            Ok(()) => {
                debug!(
                    "Emitted {:?} = {:.3} at offset {:?}",
                    event.channel, event.value, event.offset
                );
                emitted += 1;
            }
            Err(err) => {
                // Best effort: one rejected value does not abort the
                // rest of the macro.
                warn!(
                    "Sink rejected {:?} = {:.3}, continuing: {}",
                    event.channel, event.value, err
                );
            }
        }
    }

    // Mandatory on every path: no channel stays stuck mid-macro.
    if let Err(err) = sink.reset_all() {
        error!("Virtual device reset failed after playback: {}", err);
    }

    if outcome == PlaybackOutcome::Completed {
        info!(
            "Playback completed: {} events emitted in {:?}",
            emitted,
            start.elapsed()
        );
    }
    done_tx.send_replace(Some(outcome));
}

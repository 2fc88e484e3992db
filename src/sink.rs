//! Virtual controller output capability.
//!
//! The player never talks to a device driver directly; it drives this
//! trait. A real backend (uinput, ViGEm, ...) lives outside this crate
//! and is passed in as an owned capability object.

use tracing::info;

use crate::event::Channel;

/// Errors from the virtual device backend.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("virtual device rejected value: {0}")]
    Apply(String),

    #[error("virtual device reset failed: {0}")]
    Reset(String),
}

/// Applies synthesized input values to a virtual controller.
///
/// `reset_all` must return every channel to its neutral/released state;
/// the player calls it on every playback termination path, so a backend
/// that cannot reset reliably will leave "stuck buttons" behind.
pub trait VirtualOutputSink: Send {
    fn apply(&mut self, channel: Channel, value: f32) -> Result<(), SinkError>;

    fn reset_all(&mut self) -> Result<(), SinkError>;
}

/// Sink that logs every synthesized value instead of driving hardware.
///
/// Stands in where no virtual device driver is available and doubles as
/// the logging collaborator for synthesized output.
#[derive(Debug, Default)]
pub struct LogSink {
    applied: u64,
}

impl VirtualOutputSink for LogSink {
    fn apply(&mut self, channel: Channel, value: f32) -> Result<(), SinkError> {
        self.applied += 1;
        info!("Synthesized {:?} = {:.3}", channel, value);
        Ok(())
    }

    fn reset_all(&mut self) -> Result<(), SinkError> {
        info!(
            "Virtual device reset to neutral after {} synthesized values",
            self.applied
        );
        self.applied = 0;
        Ok(())
    }
}

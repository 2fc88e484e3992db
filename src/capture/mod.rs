//! Capture subsystem for physical gamepad input.
//!
//! Two pieces:
//!
//! 1. [`device`] - the owned physical-device capability and its gilrs adapter
//! 2. [`source`] - the polling state machine and capture task
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► DeviceCapability ──► CaptureSource ──► EventBus
//!             (RawSample)          (InputEvent)
//! ```
//!
//! The capture task polls the device in its own scheduling context so
//! device I/O latency never depends on consumer speed. Events reach the
//! bus in exactly the order the device produced them; nothing is
//! reordered or coalesced here.

pub mod device;
pub mod source;

pub use device::{DeviceCapability, DeviceError, GilrsDevice};
pub use source::{CaptureError, CaptureHandle, CaptureSettings, SourcePoll};

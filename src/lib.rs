//! Gamepad input pipeline with activity counting and macro record/replay.
//!
//! ```text
//! Gamepad ──► Capture ──► EventBus ──► {Counter, Recorder, console/logger}
//!             (Raw)       (Normalized)
//!
//! Macro ──► Player ──► VirtualOutputSink
//! ```
//!
//! Capture polls the physical device on its own task and publishes
//! normalized [`event::InputEvent`]s to the bus; every consumer drains its
//! own bounded queue so a slow subscriber never stalls capture. Playback
//! runs on an independent timer and can overlap live capture.

pub mod bus;
pub mod capture;
pub mod config;
pub mod counter;
pub mod event;
pub mod macros;
pub mod sink;

pub use bus::{BusMessage, EventBus, Subscription};
pub use event::{Channel, InputEvent, SessionClock};
pub use macros::Macro;
pub use sink::VirtualOutputSink;

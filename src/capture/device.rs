//! Physical device capability and the gilrs-backed implementation.

use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use tracing::{debug, info, warn};

use crate::event::{Channel, RawSample, RawValue};

/// Errors surfaced by a physical device capability.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to initialize device: {0}")]
    Initialization(String),

    #[error("transient device read error: {0}")]
    Transient(String),

    #[error("device disconnected")]
    Disconnected,
}

/// An owned handle onto one physical controller.
///
/// Passed explicitly to the capture source rather than held as ambient
/// global state. `poll` is non-blocking: `Ok(None)` means no report is
/// pending right now. Transient errors may be retried by the caller;
/// [`DeviceError::Disconnected`] is terminal.
pub trait DeviceCapability: Send {
    fn poll(&mut self) -> Result<Option<RawSample>, DeviceError>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

/// gilrs-backed capability reading the first connected gamepad.
pub struct GilrsDevice {
    gilrs: Gilrs,
    active_gamepad: Option<GamepadId>,
    name: String,
}

impl GilrsDevice {
    pub fn new() -> Result<Self, DeviceError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            DeviceError::Initialization(format!("failed to initialize gilrs: {}", e))
        })?;

        let (active_gamepad, name) = {
            let gamepads: Vec<(GamepadId, Gamepad<'_>)> = gilrs.gamepads().collect();
            if gamepads.is_empty() {
                warn!("No gamepad connected, waiting for one to appear");
                (None, String::from("no gamepad"))
            } else {
                info!("Found {} gamepads:", gamepads.len());
                for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                    info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
                }
                let (id, gamepad) = &gamepads[0];
                info!("Selected gamepad: {} ({})", gamepad.name(), id);
                (Some(*id), gamepad.name().to_string())
            }
        };

        Ok(Self {
            gilrs,
            active_gamepad,
            name,
        })
    }
}

impl DeviceCapability for GilrsDevice {
    fn poll(&mut self) -> Result<Option<RawSample>, DeviceError> {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            match event {
                EventType::Connected => {
                    if self.active_gamepad.is_none() {
                        self.active_gamepad = Some(id);
                        self.name = self.gilrs.gamepad(id).name().to_string();
                        info!("Gamepad connected, now reading: {} ({})", self.name, id);
                    } else {
                        debug!("Ignoring additional gamepad: {:?}", id);
                    }
                    continue;
                }
                EventType::Disconnected => {
                    if Some(id) == self.active_gamepad {
                        warn!("Active gamepad disconnected: {} ({})", self.name, id);
                        return Err(DeviceError::Disconnected);
                    }
                    continue;
                }
                _ => {}
            }

            if let Some(active_id) = self.active_gamepad {
                if id != active_id {
                    debug!("Skipping event from non-active gamepad: {:?}", id);
                    continue;
                }
            }

            if let Some(sample) = convert_gilrs_event(event) {
                return Ok(Some(sample));
            }
        }

        Ok(None)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn convert_gilrs_event(event: EventType) -> Option<RawSample> {
    match event {
        EventType::ButtonPressed(button, _) => map_button(button).map(|channel| RawSample {
            channel,
            value: RawValue::Digital(true),
        }),
        EventType::ButtonReleased(button, _) => map_button(button).map(|channel| RawSample {
            channel,
            value: RawValue::Digital(false),
        }),
        EventType::ButtonRepeated(button, _) => {
            debug!("Button repeat ignored: {:?}", button);
            None
        }
        EventType::AxisChanged(axis, value, _) => map_axis(axis).map(|channel| RawSample {
            channel,
            value: RawValue::Analog(value),
        }),
        _ => {
            debug!("Unhandled event type: {:?}", event);
            None
        }
    }
}

fn map_button(button: Button) -> Option<Channel> {
    match button {
        Button::South => Some(Channel::ButtonA),
        Button::East => Some(Channel::ButtonB),
        Button::West => Some(Channel::ButtonX),
        Button::North => Some(Channel::ButtonY),
        Button::Start => Some(Channel::Start),
        Button::Select => Some(Channel::Select),
        Button::Mode => Some(Channel::Guide),
        Button::LeftTrigger => Some(Channel::LeftBumper),
        Button::RightTrigger => Some(Channel::RightBumper),
        Button::LeftThumb => Some(Channel::LeftStickClick),
        Button::RightThumb => Some(Channel::RightStickClick),
        Button::DPadUp => Some(Channel::DPadUp),
        Button::DPadDown => Some(Channel::DPadDown),
        Button::DPadLeft => Some(Channel::DPadLeft),
        Button::DPadRight => Some(Channel::DPadRight),
        _ => None,
    }
}

fn map_axis(axis: Axis) -> Option<Channel> {
    match axis {
        Axis::LeftStickX => Some(Channel::LeftStickX),
        Axis::LeftStickY => Some(Channel::LeftStickY),
        Axis::RightStickX => Some(Channel::RightStickX),
        Axis::RightStickY => Some(Channel::RightStickY),
        Axis::LeftZ => Some(Channel::LeftTrigger),
        Axis::RightZ => Some(Channel::RightTrigger),
        _ => {
            debug!("Ignoring unsupported axis: {:?}", axis);
            None
        }
    }
}

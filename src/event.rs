//! Canonical input event model and raw-report normalization.
//!
//! Every control surface on the pad is a [`Channel`]. Raw device reports
//! arrive as [`RawSample`]s in whatever encoding the driver uses and are
//! normalized into [`InputEvent`]s with fixed value ranges: buttons are
//! exactly `0.0` or `1.0`, stick axes live in `[-1.0, 1.0]` and triggers
//! in `[0.0, 1.0]`. Normalization is a pure function of the sample and
//! the configured deadzone, so identical raw input always produces
//! identical events - recording and replay depend on that.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default stick deadzone as a fraction of full deflection.
///
/// Raw axis magnitudes below this are clamped to exactly zero; the
/// remaining range is rescaled so full deflection still reads 1.0.
pub const DEFAULT_DEADZONE: f32 = 0.05;

/// A single named button or axis on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    ButtonA,
    ButtonB,
    ButtonX,
    ButtonY,
    Start,
    Select,
    Guide,
    LeftBumper,
    RightBumper,
    LeftStickClick,
    RightStickClick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
}

impl Channel {
    /// True for the four stick axes.
    pub fn is_axis(&self) -> bool {
        matches!(
            self,
            Channel::LeftStickX
                | Channel::LeftStickY
                | Channel::RightStickX
                | Channel::RightStickY
        )
    }

    /// True for the two analog triggers.
    pub fn is_trigger(&self) -> bool {
        matches!(self, Channel::LeftTrigger | Channel::RightTrigger)
    }

    /// True for every digital control.
    pub fn is_button(&self) -> bool {
        !self.is_axis() && !self.is_trigger()
    }

    /// The resting value of the channel (released / centered).
    pub fn neutral(&self) -> f32 {
        0.0
    }
}

/// A normalized controller input event.
///
/// `timestamp` is monotonic time since session start as produced by
/// [`SessionClock`]; within one capture session timestamps are
/// non-decreasing. Events are immutable once created - consumers get
/// their own copy and never a reference into live state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub timestamp: Duration,
    pub channel: Channel,
    pub value: f32,
}

/// A raw device report before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub channel: Channel,
    pub value: RawValue,
}

/// Value encodings seen from physical device drivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    /// Digital button state.
    Digital(bool),
    /// Already-unit analog value, nominally in [-1, 1].
    Analog(f32),
    /// Integer analog value against a device-specific full-scale
    /// maximum (e.g. +-32767 on XInput-style pads).
    Scaled { value: i32, max: i32 },
}

/// Normalize a raw sample to the canonical value range for its channel.
pub fn normalize(sample: &RawSample, deadzone: f32) -> f32 {
    match sample.value {
        RawValue::Digital(pressed) => {
            if pressed {
                1.0
            } else {
                0.0
            }
        }
        RawValue::Analog(value) => normalize_analog(sample.channel, value, deadzone),
        RawValue::Scaled { value, max } => {
            let unit = if max != 0 {
                value as f32 / max as f32
            } else {
                0.0
            };
            normalize_analog(sample.channel, unit, deadzone)
        }
    }
}

fn normalize_analog(channel: Channel, value: f32, deadzone: f32) -> f32 {
    if channel.is_trigger() {
        apply_deadzone(value.clamp(0.0, 1.0), deadzone)
    } else {
        apply_deadzone(value.clamp(-1.0, 1.0), deadzone)
    }
}

/// Clamp near-zero values to exactly zero and rescale the remainder so
/// the output still spans the full range.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}

/// Monotonic clock for one capture session.
///
/// All event timestamps are durations since the session origin, taken
/// from [`Instant`] so they are immune to wall-clock adjustments.
#[derive(Debug, Clone)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Monotonic time since session start.
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(value: RawValue) -> RawSample {
        RawSample {
            channel: Channel::LeftStickX,
            value,
        }
    }

    #[test]
    fn buttons_normalize_to_unit_values() {
        let pressed = RawSample {
            channel: Channel::ButtonA,
            value: RawValue::Digital(true),
        };
        let released = RawSample {
            channel: Channel::ButtonA,
            value: RawValue::Digital(false),
        };
        assert_eq!(normalize(&pressed, DEFAULT_DEADZONE), 1.0);
        assert_eq!(normalize(&released, DEFAULT_DEADZONE), 0.0);
    }

    #[test]
    fn axis_values_stay_in_range() {
        for raw in [-2.0f32, -1.0, -0.7, -0.05, 0.0, 0.03, 0.4, 1.0, 3.5] {
            let v = normalize(&axis(RawValue::Analog(raw)), DEFAULT_DEADZONE);
            assert!((-1.0..=1.0).contains(&v), "raw {raw} normalized to {v}");
        }
    }

    #[test]
    fn deadzone_clamps_to_exact_zero() {
        let v = normalize(&axis(RawValue::Analog(0.04)), DEFAULT_DEADZONE);
        assert_eq!(v, 0.0);
        let v = normalize(&axis(RawValue::Analog(-0.04)), DEFAULT_DEADZONE);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn deadzone_rescale_spans_full_range() {
        assert_eq!(normalize(&axis(RawValue::Analog(1.0)), DEFAULT_DEADZONE), 1.0);
        assert_eq!(
            normalize(&axis(RawValue::Analog(-1.0)), DEFAULT_DEADZONE),
            -1.0
        );
        // Just past the deadzone edge the output starts near zero.
        let v = normalize(&axis(RawValue::Analog(0.06)), DEFAULT_DEADZONE);
        assert!(v > 0.0 && v < 0.05, "edge value rescaled to {v}");
    }

    #[test]
    fn scaled_values_map_like_analog() {
        let full = axis(RawValue::Scaled {
            value: 32767,
            max: 32767,
        });
        assert_eq!(normalize(&full, DEFAULT_DEADZONE), 1.0);

        let negative = axis(RawValue::Scaled {
            value: -32767,
            max: 32767,
        });
        assert_eq!(normalize(&negative, DEFAULT_DEADZONE), -1.0);

        // 1600/32767 is inside the 5% deadzone.
        let drift = axis(RawValue::Scaled {
            value: 1600,
            max: 32767,
        });
        assert_eq!(normalize(&drift, DEFAULT_DEADZONE), 0.0);
    }

    #[test]
    fn triggers_clamp_to_unit_interval() {
        let sample = RawSample {
            channel: Channel::LeftTrigger,
            value: RawValue::Analog(1.4),
        };
        assert_eq!(normalize(&sample, DEFAULT_DEADZONE), 1.0);
        let sample = RawSample {
            channel: Channel::LeftTrigger,
            value: RawValue::Analog(-0.3),
        };
        assert_eq!(normalize(&sample, DEFAULT_DEADZONE), 0.0);
    }

    #[test]
    fn normalization_is_deterministic() {
        let sample = axis(RawValue::Analog(0.37));
        let first = normalize(&sample, DEFAULT_DEADZONE);
        for _ in 0..100 {
            assert_eq!(normalize(&sample, DEFAULT_DEADZONE), first);
        }
    }

    #[test]
    fn session_clock_is_non_decreasing() {
        let clock = SessionClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}

//! Macro recording, playback and persistence.
//!
//! A [`Macro`] is an ordered sequence of channel/value pairs with
//! offsets relative to the first recorded event. Offsets are
//! non-decreasing by construction - [`Macro::from_events`] is the only
//! way to build one, so a macro in hand is always replayable as-is.
//!
//! 1. [`recorder`] - arms on command and accumulates bus events
//! 2. [`player`] - replays with original (optionally scaled) spacing
//! 3. [`file`] - JSON persistence and the named macro library

pub mod file;
pub mod player;
pub mod recorder;

use std::time::Duration;

use crate::event::Channel;

/// One step of a macro: what to emit and when, relative to playback
/// start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroEvent {
    pub offset: Duration,
    pub channel: Channel,
    pub value: f32,
}

/// Errors constructing a [`Macro`].
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("macro event offsets must be non-decreasing (event {index} goes backwards)")]
    NonMonotonicOffsets { index: usize },
}

/// A recorded, replayable sequence of timestamped input events.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    events: Vec<MacroEvent>,
    total_duration: Duration,
    truncated: bool,
}

impl Macro {
    /// Build a macro from ordered events.
    ///
    /// Rejects any sequence whose offsets decrease; equal offsets are
    /// fine and replay in the order given.
    pub fn from_events(events: Vec<MacroEvent>) -> Result<Self, MacroError> {
        for (index, pair) in events.windows(2).enumerate() {
            if pair[1].offset < pair[0].offset {
                return Err(MacroError::NonMonotonicOffsets { index: index + 1 });
            }
        }
        let total_duration = events.last().map(|e| e.offset).unwrap_or(Duration::ZERO);
        Ok(Self {
            events,
            total_duration,
            truncated: false,
        })
    }

    /// The empty macro: valid, and a no-op on playback.
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            total_duration: Duration::ZERO,
            truncated: false,
        }
    }

    pub fn events(&self) -> &[MacroEvent] {
        &self.events
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the recording was cut short by a device disconnect.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ms: u64) -> MacroEvent {
        MacroEvent {
            offset: Duration::from_millis(ms),
            channel: Channel::ButtonA,
            value: 1.0,
        }
    }

    #[test]
    fn from_events_accepts_non_decreasing_offsets() {
        let m = Macro::from_events(vec![ev(0), ev(0), ev(500), ev(500), ev(1200)]).unwrap();
        assert_eq!(m.len(), 5);
        assert_eq!(m.total_duration(), Duration::from_millis(1200));
    }

    #[test]
    fn from_events_rejects_decreasing_offsets() {
        let err = Macro::from_events(vec![ev(0), ev(500), ev(400)]).unwrap_err();
        assert!(matches!(err, MacroError::NonMonotonicOffsets { index: 2 }));
    }

    #[test]
    fn empty_macro_is_valid_with_zero_duration() {
        let m = Macro::empty();
        assert!(m.is_empty());
        assert_eq!(m.total_duration(), Duration::ZERO);
        assert!(!m.is_truncated());
    }

    #[test]
    fn truncation_flag_is_sticky() {
        let mut m = Macro::from_events(vec![ev(0)]).unwrap();
        assert!(!m.is_truncated());
        m.mark_truncated();
        assert!(m.is_truncated());
    }
}

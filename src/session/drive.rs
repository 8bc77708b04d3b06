//! Setpoint holding for the drive loop
//!
//! Invariant: `pending_ticks > 0` exactly when the setpoint is non-neutral.

use crate::session::commands::SkipReason;
use spiderlink_shared::Setpoint;

/// The setpoint the drive loop is currently carrying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveState {
    setpoint: Setpoint,
    pending_ticks: u32,
}

impl DriveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setpoint(&self) -> Setpoint {
        self.setpoint
    }

    pub fn pending_ticks(&self) -> u32 {
        self.pending_ticks
    }

    /// A maneuver is holding the loop
    pub fn is_active(&self) -> bool {
        self.pending_ticks > 0
    }

    /// Start holding `setpoint` for `steps` ticks
    ///
    /// Ignored while another maneuver is in progress; it always runs to
    /// completion with a constant setpoint.
    pub fn request(&mut self, setpoint: Setpoint, steps: u32) -> Result<(), SkipReason> {
        if self.is_active() {
            return Err(SkipReason::ManeuverInProgress);
        }
        if steps == 0 || setpoint.is_neutral() {
            return Err(SkipReason::EmptyManeuver);
        }
        self.setpoint = setpoint;
        self.pending_ticks = steps;
        Ok(())
    }

    /// Drop the current maneuver, if any, and return to neutral
    ///
    /// Returns the setpoint that was abandoned.
    pub fn cancel(&mut self) -> Option<Setpoint> {
        if !self.is_active() {
            return None;
        }
        let abandoned = self.setpoint;
        *self = Self::default();
        Some(abandoned)
    }

    /// Account for one transmitted tick
    ///
    /// Returns the finished setpoint when this tick was the last one of a
    /// maneuver.
    pub fn advance(&mut self) -> Option<Setpoint> {
        match self.pending_ticks {
            0 => None,
            1 => {
                let finished = self.setpoint;
                self.pending_ticks = 0;
                self.setpoint = Setpoint::NEUTRAL;
                Some(finished)
            }
            _ => {
                self.pending_ticks -= 1;
                None
            }
        }
    }
}

//! Flight commands, their guards, and how they reach the wire

use bytes::Bytes;
use spiderlink_shared::codec::{self, class};
use spiderlink_shared::{Channel, ChannelSequencer, FlightState, FlipDirection, Setpoint};

/// Single-axis motion used by the named drive operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Up,
    Down,
    TurnLeft,
    TurnRight,
    TiltLeft,
    TiltRight,
}

impl Direction {
    /// Setpoint with `speed` applied to this direction's axis
    pub fn setpoint(self, speed: u8) -> Setpoint {
        let v = speed as i32;
        match self {
            Direction::Forward => Setpoint::new(0, v, 0, 0),
            Direction::Backward => Setpoint::new(0, -v, 0, 0),
            Direction::Up => Setpoint::new(0, 0, 0, v),
            Direction::Down => Setpoint::new(0, 0, 0, -v),
            Direction::TurnLeft => Setpoint::new(0, 0, -v, 0),
            Direction::TurnRight => Setpoint::new(0, 0, v, 0),
            Direction::TiltLeft => Setpoint::new(-v, 0, 0, 0),
            Direction::TiltRight => Setpoint::new(v, 0, 0, 0),
        }
    }
}

/// Speed and duration of a named drive operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Maneuver {
    /// Axis magnitude, 0..=100
    pub speed: u8,
    /// Number of drive ticks to hold the setpoint
    pub steps: u32,
}

impl Default for Maneuver {
    fn default() -> Self {
        Self {
            speed: 50,
            steps: 50,
        }
    }
}

impl Maneuver {
    pub fn new(speed: u8, steps: u32) -> Self {
        Self { speed, steps }
    }
}

/// Everything a session can be asked to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TakeOff,
    Land,
    /// Take off when landed, land otherwise
    Toggle,
    FlatTrim,
    Flip(FlipDirection),
    RotorGuard(bool),
    EmergencyStop,
    /// Hold `setpoint` for `steps` drive ticks
    Drive { setpoint: Setpoint, steps: u32 },
    Move(Direction, Maneuver),
    /// Cancel the running maneuver and return to the neutral setpoint
    Hover,
    /// Metres
    SetMaxAltitude(f32),
    /// Degrees
    SetMaxTilt(f32),
    /// Metres per second
    SetMaxVerticalSpeed(f32),
    /// Degrees per second
    SetMaxRotationSpeed(f32),
    TakePicture,
}

/// Why a command completed without sending anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Take-off while already taking off or hovering
    AlreadyAirborne,
    /// Land while already landed
    AlreadyLanded,
    /// Flips need a hovering drone
    NotHovering,
    /// Speed outside 0..=100
    InvalidSpeed(u8),
    /// Another maneuver still holds the drive loop
    ManeuverInProgress,
    /// Zero steps or an all-zero setpoint
    EmptyManeuver,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyAirborne => write!(f, "already airborne"),
            SkipReason::AlreadyLanded => write!(f, "already landed"),
            SkipReason::NotHovering => write!(f, "not hovering"),
            SkipReason::InvalidSpeed(speed) => write!(f, "invalid speed {}", speed),
            SkipReason::ManeuverInProgress => write!(f, "maneuver in progress"),
            SkipReason::EmptyManeuver => write!(f, "empty maneuver"),
        }
    }
}

/// Successful outcome of a command
///
/// Guarded commands still complete successfully so sequences of commands
/// can be issued without checking the drone's state first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Frame written to the transport, or maneuver handed to the drive loop
    Sent,
    /// Nothing was sent
    Skipped(SkipReason),
}

impl Completion {
    pub fn is_sent(&self) -> bool {
        matches!(self, Completion::Sent)
    }
}

/// What executing a command amounts to on the link
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    /// One frame on one channel; the sequence number is already consumed
    Frame { channel: Channel, frame: Bytes },
    /// A setpoint for the drive loop to carry
    Maneuver { setpoint: Setpoint, steps: u32 },
    /// Drop whatever the drive loop is carrying
    Hover,
}

impl Command {
    /// Channel this command travels on
    pub fn channel(&self) -> Channel {
        match self {
            Command::EmergencyStop => Channel::Emergency,
            Command::Drive { .. } | Command::Move(..) | Command::Hover => Channel::Drive,
            _ => Channel::Command,
        }
    }

    /// Apply guards against the reported flight state, then encode
    ///
    /// A sequence number is only taken when a frame is actually produced.
    pub(crate) fn prepare(
        &self,
        flight: FlightState,
        sequencer: &mut ChannelSequencer,
    ) -> Result<Outbound, SkipReason> {
        let channel = self.channel();
        let mut seq = || sequencer.next(channel);
        let frame = match *self {
            Command::TakeOff if flight.is_airborne() => return Err(SkipReason::AlreadyAirborne),
            Command::Land if flight == FlightState::Landed => return Err(SkipReason::AlreadyLanded),
            Command::Flip(_) if flight != FlightState::Hovering => return Err(SkipReason::NotHovering),
            Command::Drive { setpoint, steps } => return maneuver(setpoint, steps),
            Command::Move(direction, Maneuver { speed, steps }) => {
                if speed > 100 {
                    return Err(SkipReason::InvalidSpeed(speed));
                }
                return maneuver(direction.setpoint(speed), steps);
            }
            Command::Hover => return Ok(Outbound::Hover),
            Command::Toggle if flight == FlightState::Landed => codec::encode_take_off(seq()),
            Command::Toggle => codec::encode_land(seq()),
            Command::TakeOff => codec::encode_take_off(seq()),
            Command::Land => codec::encode_land(seq()),
            Command::FlatTrim => codec::encode_flat_trim(seq()),
            Command::Flip(direction) => codec::encode_flip(seq(), direction),
            Command::RotorGuard(enabled) => codec::encode_rotor_guard(seq(), enabled),
            Command::EmergencyStop => codec::encode_emergency(seq()),
            Command::SetMaxAltitude(metres) => {
                codec::encode_setting(seq(), class::PILOTING_SETTINGS, 0x00, metres)
            }
            Command::SetMaxTilt(degrees) => {
                codec::encode_setting(seq(), class::PILOTING_SETTINGS, 0x01, degrees)
            }
            Command::SetMaxVerticalSpeed(speed) => {
                codec::encode_setting(seq(), class::SPEED_SETTINGS, 0x00, speed)
            }
            Command::SetMaxRotationSpeed(speed) => {
                codec::encode_setting(seq(), class::SPEED_SETTINGS, 0x01, speed)
            }
            Command::TakePicture => codec::encode_take_picture(seq()),
        };
        Ok(Outbound::Frame { channel, frame })
    }
}

fn maneuver(setpoint: Setpoint, steps: u32) -> Result<Outbound, SkipReason> {
    if steps == 0 || setpoint.is_neutral() {
        return Err(SkipReason::EmptyManeuver);
    }
    Ok(Outbound::Maneuver { setpoint, steps })
}

//! Minidrone BLE frame codec
//!
//! Outbound frames share a common header:
//! ```text
//! [ marker ][ seq ][ project ][ class ][ command ][ args... ]
//! ```
//! The sequence byte belongs to the channel the frame is written on (see
//! [`crate::sequencer`]). Notifications arrive with the same header layout.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Marker for ordinary data frames
pub const MARKER_DATA: u8 = 0x02;

/// Marker used by the handshake frame
pub const MARKER_HANDSHAKE: u8 = 0x04;

/// Project tag for minidrone piloting commands
pub const PROJECT_MINIDRONE: u8 = 0x02;

/// Fixed length of a setpoint frame
pub const SETPOINT_FRAME_LEN: usize = 19;

/// Date-stamp magic carried by the handshake
pub const HANDSHAKE_MAGIC: &[u8] = b"2014-10-28";

/// Offset of the raw status code in a flying-state notification
pub const FLIGHT_STATUS_OFFSET: usize = 6;

/// Command classes within the minidrone project
pub mod class {
    pub const PILOTING: u8 = 0x00;
    pub const SPEED_SETTINGS: u8 = 0x01;
    pub const PILOTING_STATE: u8 = 0x03;
    pub const ANIMATIONS: u8 = 0x04;
    pub const ROTOR_GUARD: u8 = 0x05;
    pub const MEDIA_RECORD: u8 = 0x06;
    pub const PILOTING_SETTINGS: u8 = 0x08;
}

/// Piloting commands (class [`class::PILOTING`])
pub mod piloting {
    pub const FLAT_TRIM: u8 = 0x00;
    pub const TAKE_OFF: u8 = 0x01;
    pub const SETPOINT: u8 = 0x02;
    pub const LAND: u8 = 0x03;
    pub const EMERGENCY: u8 = 0x04;
}

/// Errors that can occur while decoding notifications
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too short: need {needed} bytes, have {actual}")]
    FrameTooShort { needed: usize, actual: usize },

    #[error("Battery level out of range: {0}%")]
    BatteryOutOfRange(u8),
}

/// Four-axis motion vector, each axis in [-100, 100]
///
/// Only [`Setpoint::new`] builds non-neutral values, so every axis on the
/// wire has been clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Setpoint {
    roll: i8,
    pitch: i8,
    yaw: i8,
    lift: i8,
}

impl Setpoint {
    /// The all-zero (hover) setpoint
    pub const NEUTRAL: Setpoint = Setpoint {
        roll: 0,
        pitch: 0,
        yaw: 0,
        lift: 0,
    };

    /// Build a setpoint, clamping every axis into [-100, 100]
    pub fn new(roll: i32, pitch: i32, yaw: i32, lift: i32) -> Self {
        fn clamp(v: i32) -> i8 {
            v.clamp(-100, 100) as i8
        }
        Self {
            roll: clamp(roll),
            pitch: clamp(pitch),
            yaw: clamp(yaw),
            lift: clamp(lift),
        }
    }

    pub fn roll(&self) -> i8 {
        self.roll
    }

    pub fn pitch(&self) -> i8 {
        self.pitch
    }

    pub fn yaw(&self) -> i8 {
        self.yaw
    }

    pub fn lift(&self) -> i8 {
        self.lift
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

/// Flip animation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlipDirection {
    Front = 0,
    Back = 1,
    Right = 2,
    Left = 3,
}

fn header(buf: &mut BytesMut, marker: u8, seq: u8, project: u8, class: u8, command: u8) {
    buf.put_u8(marker);
    buf.put_u8(seq);
    buf.put_u8(project);
    buf.put_u8(class);
    buf.put_u8(command);
}

/// Encode the fixed 19-byte motion-update frame
///
/// `active` is the flag byte telling the firmware a maneuver is in progress.
pub fn encode_setpoint(seq: u8, setpoint: &Setpoint, active: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(SETPOINT_FRAME_LEN);
    header(
        &mut buf,
        MARKER_DATA,
        seq,
        PROJECT_MINIDRONE,
        class::PILOTING,
        piloting::SETPOINT,
    );
    buf.put_u8(0x00);
    buf.put_u8(active as u8);
    // Axis order is fixed by the firmware contract
    buf.put_i16_le(setpoint.roll as i16);
    buf.put_i16_le(setpoint.pitch as i16);
    buf.put_i16_le(setpoint.yaw as i16);
    buf.put_i16_le(setpoint.lift as i16);
    buf.put_bytes(0, SETPOINT_FRAME_LEN - buf.len());
    buf.freeze()
}

/// Encode a variable-length command frame: header followed by `args`
pub fn encode_simple_command(seq: u8, class: u8, command: u8, args: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + args.len());
    header(&mut buf, MARKER_DATA, seq, PROJECT_MINIDRONE, class, command);
    buf.put_slice(args);
    buf.freeze()
}

/// Encode the handshake frame that must precede any drive frame
pub fn encode_handshake(seq: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(7 + HANDSHAKE_MAGIC.len());
    header(&mut buf, MARKER_HANDSHAKE, seq, 0x00, 0x04, 0x01);
    buf.put_u8(0x00);
    buf.put_slice(HANDSHAKE_MAGIC);
    buf.put_u8(0x00);
    buf.freeze()
}

pub fn encode_take_off(seq: u8) -> Bytes {
    encode_simple_command(seq, class::PILOTING, piloting::TAKE_OFF, &[0x00])
}

pub fn encode_land(seq: u8) -> Bytes {
    encode_simple_command(seq, class::PILOTING, piloting::LAND, &[0x00])
}

pub fn encode_flat_trim(seq: u8) -> Bytes {
    encode_simple_command(seq, class::PILOTING, piloting::FLAT_TRIM, &[0x00])
}

/// Emergency cut-off; written on the emergency channel
pub fn encode_emergency(seq: u8) -> Bytes {
    encode_simple_command(seq, class::PILOTING, piloting::EMERGENCY, &[0x00])
}

/// Flip animation; the direction occupies the final byte of the frame
pub fn encode_flip(seq: u8, direction: FlipDirection) -> Bytes {
    let args = [0x00, 0x00, 0x00, 0x00, direction as u8];
    encode_simple_command(seq, class::ANIMATIONS, 0x00, &args)
}

pub fn encode_rotor_guard(seq: u8, enabled: bool) -> Bytes {
    encode_simple_command(seq, class::ROTOR_GUARD, 0x02, &[enabled as u8])
}

/// Encode a float-valued piloting/speed setting
pub fn encode_setting(seq: u8, class: u8, command: u8, value: f32) -> Bytes {
    let mut args = [0u8; 5];
    args[1..].copy_from_slice(&value.to_le_bytes());
    encode_simple_command(seq, class, command, &args)
}

pub fn encode_take_picture(seq: u8) -> Bytes {
    encode_simple_command(seq, class::MEDIA_RECORD, 0x01, &[0x00])
}

/// Decode a battery notification: the level is the last byte
pub fn decode_battery(data: &[u8]) -> Result<u8, CodecError> {
    let level = *data.last().ok_or(CodecError::FrameTooShort {
        needed: 1,
        actual: 0,
    })?;
    if level > 100 {
        return Err(CodecError::BatteryOutOfRange(level));
    }
    Ok(level)
}

/// Decode the raw status code of a flying-state notification
pub fn decode_flight_status(data: &[u8]) -> Result<u8, CodecError> {
    data.get(FLIGHT_STATUS_OFFSET)
        .copied()
        .ok_or(CodecError::FrameTooShort {
            needed: FLIGHT_STATUS_OFFSET + 1,
            actual: data.len(),
        })
}

/// Whether a notification carries the flying-state event
pub fn is_flying_state_event(data: &[u8]) -> bool {
    data.len() > FLIGHT_STATUS_OFFSET
        && data[2] == PROJECT_MINIDRONE
        && data[3] == class::PILOTING_STATE
        && data[4] == 0x01
}

/// Build a flying-state notification as the firmware sends it
pub fn flying_state_notification(seq: u8, raw_status: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    header(
        &mut buf,
        MARKER_HANDSHAKE,
        seq,
        PROJECT_MINIDRONE,
        class::PILOTING_STATE,
        0x01,
    );
    buf.put_u8(0x00);
    buf.put_u32_le(raw_status as u32);
    buf.freeze()
}

/// Build a battery notification as the firmware sends it
pub fn battery_notification(seq: u8, percent: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    header(&mut buf, MARKER_HANDSHAKE, seq, 0x00, 0x05, 0x01);
    buf.put_u8(0x00);
    buf.put_u8(percent);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_take_off_and_land_layout() {
        assert_eq!(&encode_take_off(7)[..], &[0x02, 7, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(&encode_land(8)[..], &[0x02, 8, 0x02, 0x00, 0x03, 0x00]);
        assert_eq!(&encode_flat_trim(1)[..], &[0x02, 1, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&encode_emergency(0)[..], &[0x02, 0, 0x02, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn test_handshake_carries_magic() {
        let frame = encode_handshake(3);
        assert_eq!(frame.len(), 17);
        assert_eq!(&frame[..6], &[0x04, 3, 0x00, 0x04, 0x01, 0x00]);
        assert_eq!(&frame[6..16], b"2014-10-28");
        assert_eq!(frame[16], 0x00);
    }

    #[test]
    fn test_setpoint_layout() {
        let sp = Setpoint::new(-100, 50, 0, 100);
        let frame = encode_setpoint(9, &sp, true);
        assert_eq!(frame.len(), SETPOINT_FRAME_LEN);
        assert_eq!(&frame[..7], &[0x02, 9, 0x02, 0x00, 0x02, 0x00, 0x01]);
        assert_eq!(i16::from_le_bytes([frame[7], frame[8]]), -100);
        assert_eq!(i16::from_le_bytes([frame[9], frame[10]]), 50);
        assert_eq!(i16::from_le_bytes([frame[11], frame[12]]), 0);
        assert_eq!(i16::from_le_bytes([frame[13], frame[14]]), 100);
        assert!(frame[15..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_neutral_setpoint_flag() {
        let frame = encode_setpoint(0, &Setpoint::NEUTRAL, false);
        assert_eq!(frame[6], 0x00);
        assert!(frame[7..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_setpoint_clamps() {
        let sp = Setpoint::new(500, -500, 101, -101);
        assert_eq!(sp, Setpoint { roll: 100, pitch: -100, yaw: 100, lift: -100 });

        let sp = Setpoint::new(127, -128, 0, 0);
        assert_eq!((sp.roll(), sp.pitch()), (100, -100));
        let frame = encode_setpoint(0, &sp, true);
        assert_eq!(i16::from_le_bytes([frame[7], frame[8]]), 100);
        assert_eq!(i16::from_le_bytes([frame[9], frame[10]]), -100);
    }

    #[test]
    fn test_flip_and_rotor_guard() {
        assert_eq!(
            &encode_flip(4, FlipDirection::Left)[..],
            &[0x02, 4, 0x02, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03]
        );
        assert_eq!(&encode_rotor_guard(5, true)[..], &[0x02, 5, 0x02, 0x05, 0x02, 0x01]);
        assert_eq!(&encode_rotor_guard(6, false)[..], &[0x02, 6, 0x02, 0x05, 0x02, 0x00]);
    }

    #[test]
    fn test_setting_encodes_float() {
        let frame = encode_setting(2, class::PILOTING_SETTINGS, 0x00, 2.5);
        assert_eq!(&frame[..6], &[0x02, 2, 0x02, 0x08, 0x00, 0x00]);
        assert_eq!(f32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]), 2.5);
    }

    #[test]
    fn test_decode_battery() {
        assert_eq!(decode_battery(&battery_notification(1, 87)), Ok(87));
        assert_eq!(decode_battery(&[0x04, 0x01, 42]), Ok(42));
        assert!(matches!(decode_battery(&[]), Err(CodecError::FrameTooShort { .. })));
        assert_eq!(decode_battery(&[0xff]), Err(CodecError::BatteryOutOfRange(0xff)));
    }

    #[test]
    fn test_decode_flight_status_too_short() {
        let result = decode_flight_status(&[0x04, 0x01, 0x02]);
        assert_eq!(
            result,
            Err(CodecError::FrameTooShort { needed: 7, actual: 3 })
        );
    }

    #[test]
    fn test_flying_state_event_filter() {
        assert!(is_flying_state_event(&flying_state_notification(0, 2)));
        assert!(!is_flying_state_event(&battery_notification(0, 50)));
        assert!(!is_flying_state_event(&[0x04, 0x00, 0x02]));
    }

    proptest! {
        #[test]
        fn prop_flight_status_roundtrip(seq in any::<u8>(), code in any::<u8>()) {
            let frame = flying_state_notification(seq, code);
            prop_assert!(is_flying_state_event(&frame));
            prop_assert_eq!(decode_flight_status(&frame), Ok(code));
        }

        #[test]
        fn prop_setpoint_frame_is_fixed_length(
            roll in -100i32..=100,
            pitch in -100i32..=100,
            yaw in -100i32..=100,
            lift in -100i32..=100,
            seq in any::<u8>(),
        ) {
            let sp = Setpoint::new(roll, pitch, yaw, lift);
            let frame = encode_setpoint(seq, &sp, !sp.is_neutral());
            prop_assert_eq!(frame.len(), SETPOINT_FRAME_LEN);
            prop_assert_eq!(frame[1], seq);
            prop_assert_eq!(frame[6], (!sp.is_neutral()) as u8);
        }
    }
}

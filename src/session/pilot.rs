//! Named flight operations shared by sessions and swarms
//!
//! Implementors only provide [`Pilot::execute`]; every named operation is
//! a thin wrapper building the matching [`Command`].

use crate::session::commands::{Command, Direction, Maneuver};
use async_trait::async_trait;
use spiderlink_shared::{FlipDirection, Setpoint};

#[async_trait]
pub trait Pilot: Send + Sync {
    /// What one command resolves to: a per-drone completion for a session,
    /// an aggregate report for a swarm
    type Output: Send;

    async fn execute(&self, command: Command) -> Self::Output;

    async fn take_off(&self) -> Self::Output {
        self.execute(Command::TakeOff).await
    }

    async fn land(&self) -> Self::Output {
        self.execute(Command::Land).await
    }

    /// Take off when landed, land otherwise
    async fn toggle(&self) -> Self::Output {
        self.execute(Command::Toggle).await
    }

    async fn flat_trim(&self) -> Self::Output {
        self.execute(Command::FlatTrim).await
    }

    async fn calibrate(&self) -> Self::Output {
        self.flat_trim().await
    }

    async fn emergency_stop(&self) -> Self::Output {
        self.execute(Command::EmergencyStop).await
    }

    async fn emergency(&self) -> Self::Output {
        self.emergency_stop().await
    }

    async fn flip(&self, direction: FlipDirection) -> Self::Output {
        self.execute(Command::Flip(direction)).await
    }

    async fn front_flip(&self) -> Self::Output {
        self.flip(FlipDirection::Front).await
    }

    async fn back_flip(&self) -> Self::Output {
        self.flip(FlipDirection::Back).await
    }

    async fn left_flip(&self) -> Self::Output {
        self.flip(FlipDirection::Left).await
    }

    async fn right_flip(&self) -> Self::Output {
        self.flip(FlipDirection::Right).await
    }

    async fn rotor_guard_on(&self) -> Self::Output {
        self.execute(Command::RotorGuard(true)).await
    }

    async fn rotor_guard_off(&self) -> Self::Output {
        self.execute(Command::RotorGuard(false)).await
    }

    /// Hold `setpoint` for `steps` drive ticks
    async fn drive(&self, setpoint: Setpoint, steps: u32) -> Self::Output {
        self.execute(Command::Drive { setpoint, steps }).await
    }

    /// Cancel any running maneuver and hold position
    async fn hover(&self) -> Self::Output {
        self.execute(Command::Hover).await
    }

    async fn forward(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::Forward, maneuver)).await
    }

    async fn backward(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::Backward, maneuver)).await
    }

    async fn up(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::Up, maneuver)).await
    }

    async fn down(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::Down, maneuver)).await
    }

    async fn turn_left(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::TurnLeft, maneuver)).await
    }

    async fn counter_clockwise(&self, maneuver: Maneuver) -> Self::Output {
        self.turn_left(maneuver).await
    }

    async fn turn_right(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::TurnRight, maneuver)).await
    }

    async fn clockwise(&self, maneuver: Maneuver) -> Self::Output {
        self.turn_right(maneuver).await
    }

    async fn tilt_left(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::TiltLeft, maneuver)).await
    }

    async fn left(&self, maneuver: Maneuver) -> Self::Output {
        self.tilt_left(maneuver).await
    }

    async fn tilt_right(&self, maneuver: Maneuver) -> Self::Output {
        self.execute(Command::Move(Direction::TiltRight, maneuver)).await
    }

    async fn right(&self, maneuver: Maneuver) -> Self::Output {
        self.tilt_right(maneuver).await
    }

    async fn set_max_altitude(&self, metres: f32) -> Self::Output {
        self.execute(Command::SetMaxAltitude(metres)).await
    }

    async fn set_max_tilt(&self, degrees: f32) -> Self::Output {
        self.execute(Command::SetMaxTilt(degrees)).await
    }

    async fn set_max_vertical_speed(&self, metres_per_second: f32) -> Self::Output {
        self.execute(Command::SetMaxVerticalSpeed(metres_per_second)).await
    }

    async fn set_max_rotation_speed(&self, degrees_per_second: f32) -> Self::Output {
        self.execute(Command::SetMaxRotationSpeed(degrees_per_second)).await
    }

    async fn take_picture(&self) -> Self::Output {
        self.execute(Command::TakePicture).await
    }
}

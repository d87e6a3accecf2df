use thiserror::Error;

use crate::sink::LineId;

/// Precondition violations reported by [`StepperChannel`](crate::StepperChannel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepperError {
    /// A motor needs at least one step per revolution.
    #[error("steps per revolution must be positive")]
    ZeroStepsPerRevolution,

    /// Speed was zero or negative.
    #[error("speed must be a positive rpm, got {rpm}")]
    InvalidSpeed { rpm: i64 },

    /// Motion was requested before `set_speed` was ever called.
    #[error("no speed set, call set_speed before moving")]
    SpeedNotSet,

    /// The same output line was given twice for one motor.
    #[error("output line {line} is assigned more than once")]
    DuplicateLine { line: LineId },
}

//! Stepper motors on 74HC595 shift registers.
//!
//! Every motor gets a [`StepperChannel`] bound to four outputs of a shared
//! register chain, so any number of motors runs off three GPIO lines.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod shift_register;
pub mod sink;

pub use channel::{Direction, StepperChannel, COIL_SEQUENCE};
pub use clock::{Clock, ClockDelay, ManualClock, MonotonicClock, SpinDelay};
pub use config::{ConfigError, MotorConfig, RigConfig};
pub use error::StepperError;
pub use shift_register::ShiftRegister;
pub use sink::{LineId, OutputSink, RecordingSink};

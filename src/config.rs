//! Rig description: which GPIO pins drive the register chain and which
//! register outputs each motor is wired to.
//!
//! ```toml
//! [shift_register]
//! data_pin = 17
//! clock_pin = 27
//! latch_pin = 22
//! registers = 2
//!
//! [[motors]]
//! name = "pan"
//! steps_per_revolution = 2048
//! lines = [0, 1, 2, 3]
//! rpm = 10
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::channel::StepperChannel;
use crate::clock::Clock;
use crate::error::StepperError;
use crate::shift_register::LINES_PER_REGISTER;
use crate::sink::{LineId, OutputSink};

/// Longest register chain the binary is built for.
pub const MAX_REGISTERS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rig configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),

    #[error("rig configuration is invalid: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RigConfig {
    pub shift_register: ShiftRegisterConfig,
    pub motors: Vec<MotorConfig>,
}

/// BCM numbers of the three control pins and the chain length.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShiftRegisterConfig {
    pub data_pin: u8,
    pub clock_pin: u8,
    pub latch_pin: u8,
    #[serde(default = "default_registers")]
    pub registers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorConfig {
    pub name: String,
    pub steps_per_revolution: u32,
    /// Register outputs wired to the four coil inputs, in drive order.
    pub lines: [LineId; 4],
    #[serde(default = "default_rpm")]
    pub rpm: i64,
}

fn default_registers() -> usize {
    1
}

fn default_rpm() -> i64 {
    10
}

impl RigConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RigConfig = toml_edit::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the wiring: every line exists on the chain and no output is
    /// claimed by two coils.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sr = &self.shift_register;
        if sr.registers == 0 || sr.registers > MAX_REGISTERS {
            return Err(invalid(format!(
                "registers must be between 1 and {MAX_REGISTERS}, got {}",
                sr.registers
            )));
        }
        if sr.data_pin == sr.clock_pin || sr.data_pin == sr.latch_pin || sr.clock_pin == sr.latch_pin
        {
            return Err(invalid("data, clock and latch need distinct pins".to_string()));
        }
        if self.motors.is_empty() {
            return Err(invalid("at least one motor is required".to_string()));
        }

        let line_count = sr.registers as LineId * LINES_PER_REGISTER;
        let mut names = HashSet::new();
        let mut claimed = HashSet::new();
        for motor in &self.motors {
            if motor.name.is_empty() {
                return Err(invalid("motor name cannot be empty".to_string()));
            }
            if !names.insert(motor.name.as_str()) {
                return Err(invalid(format!("motor {:?} is defined twice", motor.name)));
            }
            if motor.steps_per_revolution == 0 {
                return Err(invalid(format!(
                    "motor {:?}: steps_per_revolution must be positive",
                    motor.name
                )));
            }
            if motor.rpm <= 0 {
                return Err(invalid(format!("motor {:?}: rpm must be positive", motor.name)));
            }
            for &line in &motor.lines {
                if line >= line_count {
                    return Err(invalid(format!(
                        "motor {:?}: line {line} is past the last output ({})",
                        motor.name,
                        line_count - 1
                    )));
                }
                if !claimed.insert(line) {
                    return Err(invalid(format!(
                        "motor {:?}: line {line} is already in use",
                        motor.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn find_motor(&self, name: &str) -> Option<&MotorConfig> {
        self.motors.iter().find(|motor| motor.name == name)
    }
}

impl MotorConfig {
    /// Build a channel for this motor on `sink`, with its configured speed
    /// (or `rpm` when given) already applied.
    pub fn channel<S, C>(
        &self,
        sink: S,
        clock: C,
        rpm: Option<i64>,
    ) -> Result<StepperChannel<S, C>, StepperError>
    where
        S: OutputSink,
        C: Clock,
    {
        let mut channel = StepperChannel::new(self.steps_per_revolution, sink, self.lines, clock)?;
        channel.set_speed(rpm.unwrap_or(self.rpm))?;
        Ok(channel)
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation(message)
}

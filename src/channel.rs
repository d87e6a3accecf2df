//! Step timing for one 4-wire stepper motor.
//!
//! A [`StepperChannel`] owns the position, coil phase and pacing state of a
//! single motor and writes its four coil lines through a shared
//! [`OutputSink`]. Motion is either blocking ([`StepperChannel::step`]) or
//! cooperative ([`StepperChannel::step_async`] plus repeated
//! [`StepperChannel::update`]). Mixing the two on one channel is a caller error:
//! nothing guards against it and the phase sequence becomes unpredictable.

use embedded_hal::delay::DelayNs;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::error::StepperError;
use crate::sink::{LineId, OutputSink};

/// Full-step drive sequence. Row = phase, column = owned line in construction order.
pub const COIL_SEQUENCE: [[bool; 4]; 4] = [
    [true, false, true, false],
    [false, true, true, false],
    [false, true, false, true],
    [true, false, false, true],
];

pub const PHASE_COUNT: u32 = 4;

const MICROS_PER_MINUTE: u64 = 60_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Positive counts go forward, everything else in reverse.
    pub fn from_steps(steps: i64) -> Self {
        if steps > 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

/// `value mod modulus`, always in `0..modulus` even for negative `value`.
pub fn wrap(value: i64, modulus: u32) -> u32 {
    value.rem_euclid(i64::from(modulus)) as u32
}

/// Step delay in microseconds for `rpm` on a motor with `steps_per_revolution` steps.
pub(crate) fn step_delay_micros(steps_per_revolution: u32, rpm: u64) -> u64 {
    MICROS_PER_MINUTE / u64::from(steps_per_revolution) / rpm
}

#[derive(Debug)]
pub struct StepperChannel<S, C> {
    sink: S,
    clock: C,
    lines: [LineId; 4],
    steps_per_revolution: u32,
    step_delay: Option<u64>,
    position: u32,
    phase: u32,
    last_step_time: u64,
    direction: Direction,
    target_steps: u64,
    steps_done: u64,
    moving: bool,
}

impl<S, C> StepperChannel<S, C>
where
    S: OutputSink,
    C: Clock,
{
    /// Create a channel for a motor with `steps_per_revolution` full steps,
    /// whose coils are wired to `lines` of `sink`.
    ///
    /// Nothing is written to the sink until the first step.
    pub fn new(
        steps_per_revolution: u32,
        sink: S,
        lines: [LineId; 4],
        clock: C,
    ) -> Result<Self, StepperError> {
        if steps_per_revolution == 0 {
            return Err(StepperError::ZeroStepsPerRevolution);
        }
        for (i, line) in lines.iter().enumerate() {
            if lines[..i].contains(line) {
                return Err(StepperError::DuplicateLine { line: *line });
            }
        }
        Ok(Self {
            sink,
            clock,
            lines,
            steps_per_revolution,
            step_delay: None,
            position: 0,
            phase: 0,
            last_step_time: 0,
            direction: Direction::Forward,
            target_steps: 0,
            steps_done: 0,
            moving: false,
        })
    }

    /// Set the speed in revolutions per minute.
    ///
    /// Takes effect on the next pacing check, also in the middle of a move.
    pub fn set_speed(&mut self, rpm: i64) -> Result<(), StepperError> {
        if rpm <= 0 {
            return Err(StepperError::InvalidSpeed { rpm });
        }
        let delay = step_delay_micros(self.steps_per_revolution, rpm.unsigned_abs());
        debug!(rpm, step_delay_us = delay, "speed set");
        self.step_delay = Some(delay);
        Ok(())
    }

    /// Move `steps` steps and return once they are all done.
    ///
    /// Negative counts run in reverse. Between steps the loop hands the
    /// remaining wait to `delay`: [`SpinDelay`](crate::clock::SpinDelay) keeps
    /// the thread spinning on the clock, a sleeping delay yields it instead.
    /// A step is never taken early; when the loop comes back late the step is
    /// simply late, nothing is made up.
    pub fn step<D: DelayNs>(&mut self, delay: &mut D, steps: i32) -> Result<(), StepperError> {
        if steps == 0 {
            return Ok(());
        }
        if self.step_delay.is_none() {
            return Err(StepperError::SpeedNotSet);
        }

        let direction = Direction::from_steps(steps.into());
        let mut steps_left = steps.unsigned_abs();
        while steps_left > 0 {
            if self.tick(direction) {
                steps_left -= 1;
            } else {
                delay.delay_us(self.time_to_next_step());
            }
        }
        Ok(())
    }

    /// Start a move of `steps` steps that [`update`](Self::update) carries out.
    ///
    /// Replaces any move in progress. A count of zero does nothing at all, it
    /// does not stop a running move.
    pub fn step_async(&mut self, steps: i64) -> Result<(), StepperError> {
        if steps == 0 {
            return Ok(());
        }
        if self.step_delay.is_none() {
            return Err(StepperError::SpeedNotSet);
        }

        self.direction = Direction::from_steps(steps);
        self.target_steps = steps.unsigned_abs();
        self.steps_done = 0;
        self.moving = true;
        debug!(steps, "async move started");
        Ok(())
    }

    /// Take at most one step of the current async move if it is due.
    ///
    /// Call this on every pass of the control loop. Returns `true` if a step
    /// was emitted. Intervals missed because the loop was slow are not caught
    /// up.
    pub fn update(&mut self) -> bool {
        if !self.moving {
            return false;
        }
        if !self.tick(self.direction) {
            return false;
        }

        self.steps_done += 1;
        if self.steps_done >= self.target_steps {
            self.moving = false;
            debug!(position = self.position, "async move complete");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.moving
    }

    pub fn steps_per_revolution(&self) -> u32 {
        self.steps_per_revolution
    }

    /// Microseconds between steps, `None` until a speed is set.
    pub fn step_delay(&self) -> Option<u64> {
        self.step_delay
    }

    /// Absolute position in `0..steps_per_revolution`.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Index of the last emitted row of [`COIL_SEQUENCE`].
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Direction of the last async move.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn output_lines(&self) -> [LineId; 4] {
        self.lines
    }

    /// Steps left in the current async move.
    pub fn steps_remaining(&self) -> u64 {
        if self.moving {
            self.target_steps - self.steps_done
        } else {
            0
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// One pacing check: step in `direction` if the step delay has passed.
    fn tick(&mut self, direction: Direction) -> bool {
        let Some(step_delay) = self.step_delay else {
            return false;
        };
        let now = self.clock.now_micros();
        if now.wrapping_sub(self.last_step_time) < step_delay {
            return false;
        }

        self.last_step_time = now;
        self.advance(direction);
        true
    }

    fn time_to_next_step(&self) -> u32 {
        let step_delay = self.step_delay.unwrap_or(0);
        let elapsed = self.clock.now_micros().wrapping_sub(self.last_step_time);
        u32::try_from(step_delay.saturating_sub(elapsed)).unwrap_or(u32::MAX)
    }

    // Phase is its own counter; deriving it from position breaks on direction changes.
    fn advance(&mut self, direction: Direction) {
        let sign = direction.sign();
        self.position = wrap(i64::from(self.position) + sign, self.steps_per_revolution);
        self.phase = wrap(i64::from(self.phase) + sign, PHASE_COUNT);
        trace!(position = self.position, phase = self.phase, "step");
        self.emit(self.phase);
    }

    fn emit(&mut self, phase: u32) {
        let row = COIL_SEQUENCE[phase as usize];
        let lines = self.lines;
        let frame: [(LineId, bool); 4] = core::array::from_fn(|i| (lines[i], row[i]));
        self.sink.write_lines(&frame);
    }
}

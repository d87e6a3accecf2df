//! Driver for a chain of `N` 74HC595 serial-in/parallel-out registers.
//!
//! Three pins drive the whole chain: serial data, shift clock and storage
//! latch. Levels are staged in memory and only appear on the outputs when
//! [`flush`](OutputSink::flush) shifts every byte in and pulses the latch, so
//! all outputs change together.

use embedded_hal::digital::{OutputPin, PinState};
use tracing::warn;

use crate::sink::{LineId, OutputSink};

pub const LINES_PER_REGISTER: u16 = 8;

#[derive(Debug)]
pub struct ShiftRegister<DATA, CLOCK, LATCH, const N: usize> {
    data: DATA,
    clock: CLOCK,
    latch: LATCH,
    staged: [u8; N],
}

impl<DATA, CLOCK, LATCH, const N: usize> ShiftRegister<DATA, CLOCK, LATCH, N>
where
    DATA: OutputPin,
    CLOCK: OutputPin,
    LATCH: OutputPin,
{
    /// Wrap the three control pins. All staged outputs start low; nothing is
    /// shifted out until the first flush.
    pub fn new(data: DATA, clock: CLOCK, latch: LATCH) -> Self {
        Self {
            data,
            clock,
            latch,
            staged: [0; N],
        }
    }

    pub fn register_count(&self) -> usize {
        N
    }

    pub fn line_count(&self) -> u16 {
        N as u16 * LINES_PER_REGISTER
    }

    /// Staged level of `line`, `None` if the chain has no such output.
    pub fn get(&self, line: LineId) -> Option<bool> {
        let (register, bit) = self.locate(line)?;
        Some(self.staged[register] & (1 << bit) != 0)
    }

    /// Drive every output to `level` and flush.
    pub fn set_all(&mut self, level: bool) {
        self.staged = [if level { 0xff } else { 0x00 }; N];
        self.flush();
    }

    /// Give back the control pins.
    pub fn release(self) -> (DATA, CLOCK, LATCH) {
        (self.data, self.clock, self.latch)
    }

    fn locate(&self, line: LineId) -> Option<(usize, u16)> {
        let register = usize::from(line / LINES_PER_REGISTER);
        (register < N).then_some((register, line % LINES_PER_REGISTER))
    }

    fn shift_out(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            drive(&mut self.data, byte & (1 << bit) != 0, "data");
            drive(&mut self.clock, true, "clock");
            drive(&mut self.clock, false, "clock");
        }
    }
}

impl<DATA, CLOCK, LATCH, const N: usize> OutputSink for ShiftRegister<DATA, CLOCK, LATCH, N>
where
    DATA: OutputPin,
    CLOCK: OutputPin,
    LATCH: OutputPin,
{
    fn set_line(&mut self, line: LineId, level: bool) {
        let Some((register, bit)) = self.locate(line) else {
            warn!(line, lines = self.line_count(), "line outside the register chain, ignored");
            return;
        };
        if level {
            self.staged[register] |= 1 << bit;
        } else {
            self.staged[register] &= !(1 << bit);
        }
    }

    // The last register in the chain has to be shifted in first.
    fn flush(&mut self) {
        for register in (0..N).rev() {
            let byte = self.staged[register];
            self.shift_out(byte);
        }
        drive(&mut self.latch, true, "latch");
        drive(&mut self.latch, false, "latch");
    }
}

fn drive<P: OutputPin>(pin: &mut P, level: bool, name: &'static str) {
    if let Err(e) = pin.set_state(PinState::from(level)) {
        warn!(pin = name, error = ?e, "failed to drive shift register pin");
    }
}

//! The output capability a [`StepperChannel`](crate::StepperChannel) drives.
//!
//! A sink stages line levels and pushes them to the hardware in one go on
//! [`flush`](OutputSink::flush). One sink is normally shared by several
//! channels, so this module also provides the shared-handle impls:
//!
//! - `&RefCell<S>` for a single-threaded control loop
//! - `&critical_section::Mutex<RefCell<S>>` when channels live on different threads
//!
//! Both hold their borrow for the whole [`write_lines`](OutputSink::write_lines)
//! call, so the four coil lines of a step can never interleave with another
//! channel's writes.

use std::cell::RefCell;
use std::collections::BTreeMap;

use critical_section::Mutex;

/// Index of an output line, counted from Q0 of the first register in the chain.
pub type LineId = u16;

pub trait OutputSink {
    /// Stage `level` for `line`. Must not touch the hardware.
    fn set_line(&mut self, line: LineId, level: bool);

    /// Push every staged level to the outputs at once.
    fn flush(&mut self);

    /// Stage all `lines`, then flush once.
    fn write_lines(&mut self, lines: &[(LineId, bool)]) {
        for &(line, level) in lines {
            self.set_line(line, level);
        }
        self.flush();
    }
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn set_line(&mut self, line: LineId, level: bool) {
        (**self).set_line(line, level);
    }

    fn flush(&mut self) {
        (**self).flush();
    }

    fn write_lines(&mut self, lines: &[(LineId, bool)]) {
        (**self).write_lines(lines);
    }
}

impl<S: OutputSink> OutputSink for &RefCell<S> {
    fn set_line(&mut self, line: LineId, level: bool) {
        self.borrow_mut().set_line(line, level);
    }

    fn flush(&mut self) {
        self.borrow_mut().flush();
    }

    fn write_lines(&mut self, lines: &[(LineId, bool)]) {
        self.borrow_mut().write_lines(lines);
    }
}

impl<S: OutputSink> OutputSink for &Mutex<RefCell<S>> {
    fn set_line(&mut self, line: LineId, level: bool) {
        critical_section::with(|cs| self.borrow_ref_mut(cs).set_line(line, level));
    }

    fn flush(&mut self) {
        critical_section::with(|cs| self.borrow_ref_mut(cs).flush());
    }

    fn write_lines(&mut self, lines: &[(LineId, bool)]) {
        critical_section::with(|cs| self.borrow_ref_mut(cs).write_lines(lines));
    }
}

/// Sink that keeps a log instead of driving hardware.
///
/// `writes` holds every `set_line` call in order. Each flush appends a
/// snapshot of all latched levels to `frames`.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    staged: BTreeMap<LineId, bool>,
    latched: BTreeMap<LineId, bool>,
    writes: Vec<(LineId, bool)>,
    frames: Vec<BTreeMap<LineId, bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level currently on the outputs, `None` if the line was never flushed.
    pub fn level(&self, line: LineId) -> Option<bool> {
        self.latched.get(&line).copied()
    }

    /// Level staged for the next flush.
    pub fn staged(&self, line: LineId) -> Option<bool> {
        self.staged.get(&line).copied()
    }

    pub fn writes(&self) -> &[(LineId, bool)] {
        &self.writes
    }

    pub fn frames(&self) -> &[BTreeMap<LineId, bool>] {
        &self.frames
    }

    pub fn flush_count(&self) -> usize {
        self.frames.len()
    }

    /// Levels of `lines` in every flushed frame, lines missing from a frame read low.
    pub fn patterns(&self, lines: [LineId; 4]) -> Vec<[bool; 4]> {
        self.frames
            .iter()
            .map(|frame| lines.map(|line| frame.get(&line).copied().unwrap_or(false)))
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn set_line(&mut self, line: LineId, level: bool) {
        self.staged.insert(line, level);
        self.writes.push((line, level));
    }

    fn flush(&mut self) {
        self.latched
            .extend(self.staged.iter().map(|(&line, &level)| (line, level)));
        self.frames.push(self.latched.clone());
    }
}

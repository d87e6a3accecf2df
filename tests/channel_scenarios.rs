//! Timing and phase-sequence behaviour of `StepperChannel` against a
//! recording sink and a manual clock.

use std::cell::RefCell;

use critical_section::Mutex;
use shift_stepper::channel::wrap;
use shift_stepper::{
    Clock, ClockDelay, Direction, LineId, ManualClock, MonotonicClock, RecordingSink, SpinDelay,
    StepperChannel, COIL_SEQUENCE,
};

const LINES: [LineId; 4] = [0, 1, 2, 3];

fn phases(sink: &RefCell<RecordingSink>, lines: [LineId; 4]) -> Vec<usize> {
    sink.borrow()
        .patterns(lines)
        .into_iter()
        .map(|pattern| {
            COIL_SEQUENCE
                .iter()
                .position(|row| *row == pattern)
                .expect("pattern is a row of the drive sequence")
        })
        .collect()
}

fn motor<'a>(
    sink: &'a RefCell<RecordingSink>,
    clock: &'a ManualClock,
) -> StepperChannel<&'a RefCell<RecordingSink>, &'a ManualClock> {
    let mut channel = StepperChannel::new(200, sink, LINES, clock).unwrap();
    channel.set_speed(60).unwrap();
    channel
}

#[test]
fn two_hundred_steps_at_sixty_rpm_gives_five_ms() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let channel = motor(&sink, &clock);
    assert_eq!(channel.step_delay(), Some(5_000));
}

#[test]
fn async_move_walks_the_drive_sequence() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(4).unwrap();
    for call in 1..=4 {
        assert!(channel.is_running(), "still running before update {call}");
        clock.advance(5_000);
        assert!(channel.update());
    }
    assert!(!channel.is_running());
    assert_eq!(phases(&sink, LINES), vec![1, 2, 3, 0]);
    assert_eq!(channel.position(), 4);
    assert_eq!(channel.direction(), Direction::Forward);
}

#[test]
fn every_emission_is_four_staged_lines_and_one_flush() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(2).unwrap();
    clock.advance(5_000);
    channel.update();

    let sink = sink.borrow();
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(
        sink.writes(),
        &[(0, false), (1, true), (2, true), (3, false)]
    );
}

#[test]
fn updates_after_completion_do_nothing() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(1).unwrap();
    clock.advance(5_000);
    assert!(channel.update());
    assert!(!channel.is_running());

    for _ in 0..10 {
        clock.advance(5_000);
        assert!(!channel.update());
    }
    assert_eq!(sink.borrow().flush_count(), 1);
    assert_eq!(channel.steps_remaining(), 0);
}

#[test]
fn updates_closer_than_the_step_delay_emit_nothing() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(3).unwrap();
    clock.advance(5_000);
    assert!(channel.update());

    for _ in 0..4 {
        clock.advance(1_000);
        assert!(!channel.update());
    }
    assert_eq!(channel.steps_remaining(), 2);
    assert_eq!(sink.borrow().flush_count(), 1);

    clock.advance(1_000);
    assert!(channel.update());
    assert_eq!(channel.steps_remaining(), 1);
}

#[test]
fn missed_intervals_are_not_caught_up() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(5).unwrap();
    // ten intervals go by unserviced
    clock.advance(50_000);
    assert!(channel.update());
    assert!(!channel.update());
    assert!(!channel.update());
    assert_eq!(sink.borrow().flush_count(), 1);
    assert_eq!(channel.steps_remaining(), 4);
}

#[test]
fn async_round_trip_emits_exactly_the_requested_steps() {
    for steps in [-37i64, -4, -1, 1, 3, 250] {
        let sink = RefCell::new(RecordingSink::new());
        let clock = ManualClock::new(0);
        let mut channel = motor(&sink, &clock);

        channel.step_async(steps).unwrap();
        let mut calls = 0;
        while channel.is_running() {
            clock.advance(5_000);
            channel.update();
            calls += 1;
        }

        assert_eq!(calls, steps.unsigned_abs());
        assert_eq!(sink.borrow().flush_count() as u64, steps.unsigned_abs());
        assert_eq!(channel.direction(), Direction::from_steps(steps));
        assert_eq!(channel.phase(), wrap(steps, 4));
        assert_eq!(channel.position(), wrap(steps, 200));
    }
}

#[test]
fn blocking_reverse_from_phase_zero() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);
    let mut delay = ClockDelay::new(&clock);

    channel.step(&mut delay, -2).unwrap();

    assert_eq!(phases(&sink, LINES), vec![3, 2]);
    assert_eq!(channel.position(), 198);
    assert_eq!(delay.waits(), &[5_000, 5_000]);
    assert_eq!(clock.now_micros(), 10_000);
}

#[test]
fn blocking_step_is_late_rather_than_early() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(12_000);
    let mut channel = motor(&sink, &clock);
    let mut delay = ClockDelay::new(&clock);

    channel.step(&mut delay, 2).unwrap();

    // the first step is overdue and goes at once, the second still waits a full delay
    assert_eq!(delay.waits(), &[5_000]);
    assert_eq!(phases(&sink, LINES), vec![1, 2]);
}

#[test]
fn phase_and_position_follow_modular_law() {
    for start in 0..4i64 {
        for k in 0..20i64 {
            for steps in [k, -k] {
                let sink = RefCell::new(RecordingSink::new());
                let clock = ManualClock::new(0);
                let mut channel = StepperChannel::new(7, &sink, LINES, &clock).unwrap();
                channel.set_speed(1).unwrap();
                let mut delay = ClockDelay::new(&clock);

                channel.step(&mut delay, start as i32).unwrap();
                let p0 = i64::from(channel.phase());
                let x0 = i64::from(channel.position());
                channel.step(&mut delay, steps as i32).unwrap();

                assert_eq!(channel.phase(), wrap(p0 + steps, 4));
                assert_eq!(channel.position(), wrap(x0 + steps, 7));
                assert!(channel.phase() < 4);
                assert!(channel.position() < 7);
            }
        }
    }
}

#[test]
fn is_running_is_idempotent() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(2).unwrap();
    let first = channel.is_running();
    for _ in 0..5 {
        assert_eq!(channel.is_running(), first);
    }
    assert_eq!(sink.borrow().flush_count(), 0);
}

#[test]
fn zero_step_request_does_not_stop_a_running_move() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(-6).unwrap();
    clock.advance(5_000);
    channel.update();

    channel.step_async(0).unwrap();
    assert!(channel.is_running());
    assert_eq!(channel.steps_remaining(), 5);
    assert_eq!(channel.direction(), Direction::Reverse);

    clock.advance(5_000);
    assert!(channel.update());
    assert_eq!(channel.steps_remaining(), 4);
}

#[test]
fn new_request_replaces_the_running_move() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let mut channel = motor(&sink, &clock);

    channel.step_async(10).unwrap();
    clock.advance(5_000);
    channel.update();

    channel.step_async(-2).unwrap();
    assert_eq!(channel.steps_remaining(), 2);
    for _ in 0..2 {
        clock.advance(5_000);
        channel.update();
    }
    assert!(!channel.is_running());
    assert_eq!(phases(&sink, LINES), vec![1, 0, 3]);
    assert_eq!(channel.position(), 199);
}

#[test]
fn channels_sharing_a_sink_touch_only_their_own_lines() {
    let sink = RefCell::new(RecordingSink::new());
    let clock = ManualClock::new(0);
    let pan_lines = [0, 1, 2, 3];
    let tilt_lines = [7, 6, 5, 4];

    let mut pan = StepperChannel::new(200, &sink, pan_lines, &clock).unwrap();
    let mut tilt = StepperChannel::new(48, &sink, tilt_lines, &clock).unwrap();
    pan.set_speed(60).unwrap();
    tilt.set_speed(250).unwrap();
    assert_eq!(tilt.step_delay(), Some(5_000));

    pan.step_async(3).unwrap();
    tilt.step_async(-3).unwrap();
    while pan.is_running() || tilt.is_running() {
        clock.advance(5_000);
        pan.update();
        tilt.update();
    }

    let sink = sink.borrow();
    assert_eq!(sink.flush_count(), 6);
    for chunk in sink.writes().chunks(4) {
        let lines: Vec<LineId> = chunk.iter().map(|(line, _)| *line).collect();
        assert!(lines == pan_lines || lines == tilt_lines, "mixed frame {lines:?}");
    }
    let last = sink.frames().last().unwrap();
    assert_eq!(pan_lines.map(|line| last[&line]), COIL_SEQUENCE[3]);
    assert_eq!(tilt_lines.map(|line| last[&line]), COIL_SEQUENCE[1]);
}

#[test]
fn channels_on_different_threads_share_a_locked_sink() {
    let sink = Mutex::new(RefCell::new(RecordingSink::new()));
    let clock = MonotonicClock::new();

    std::thread::scope(|scope| {
        for base in [0u16, 4] {
            let sink = &sink;
            scope.spawn(move || {
                let lines = [base, base + 1, base + 2, base + 3];
                let mut channel = StepperChannel::new(200, sink, lines, clock).unwrap();
                channel.set_speed(3_000).unwrap();
                channel.step(&mut SpinDelay, 20).unwrap();
            });
        }
    });

    critical_section::with(|cs| {
        let sink = sink.borrow_ref(cs);
        assert_eq!(sink.flush_count(), 40);
        for chunk in sink.writes().chunks(4) {
            let base = chunk[0].0;
            let lines: Vec<LineId> = chunk.iter().map(|(line, _)| *line).collect();
            assert_eq!(lines, vec![base, base + 1, base + 2, base + 3]);
        }
    });
}

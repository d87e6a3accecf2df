//! # shift-stepper
//!
//! Drives the motors described in a rig file through a 74HC595 chain on the
//! Raspberry Pi GPIO header.
//!
//! ```bash
//! # 200 steps forward on "pan", cooperative loop
//! shift-stepper --config rig.toml move pan 200
//!
//! # same move, blocking, at 5 rpm
//! shift-stepper --config rig.toml move pan 200 --rpm 5 --blocking
//!
//! # two motors at once
//! shift-stepper --config rig.toml run pan=512 tilt=-100
//! ```

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use linux_embedded_hal::Delay;
use rppal::gpio::{Gpio, OutputPin as RppalOutputPin};
use shift_stepper::{
    Clock, MonotonicClock, OutputSink, RigConfig, ShiftRegister, StepperChannel,
};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

type Register<const N: usize> = ShiftRegister<RppalOutputPin, RppalOutputPin, RppalOutputPin, N>;

#[derive(Parser, Debug)]
#[command(name = "shift-stepper")]
#[command(version)]
#[command(about = "Stepper motors on chained 74HC595 shift registers")]
struct Args {
    /// Rig description (pins, chain length, motors)
    #[arg(short, long, default_value = "/etc/shift-stepper/rig.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Move one motor by a number of steps (negative = reverse)
    Move {
        motor: String,
        #[arg(allow_negative_numbers = true)]
        steps: i64,
        /// Override the configured speed
        #[arg(long)]
        rpm: Option<i64>,
        /// Block in step() instead of running the update loop
        #[arg(long)]
        blocking: bool,
    },
    /// Move several motors together, given as NAME=STEPS
    Run {
        #[arg(required = true, value_parser = parse_move)]
        moves: Vec<(String, i64)>,
    },
}

fn parse_move(arg: &str) -> Result<(String, i64), String> {
    let (name, steps) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=STEPS, got {arg:?}"))?;
    let steps = steps
        .trim()
        .parse()
        .map_err(|e| format!("bad step count in {arg:?}: {e}"))?;
    Ok((name.trim().to_string(), steps))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("shift-stepper v{} starting", env!("CARGO_PKG_VERSION"));

    let rig = RigConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        motors = rig.motors.len(),
        registers = rig.shift_register.registers,
        "rig loaded"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = Arc::clone(&stop);
        let command = args.command.clone();
        tokio::task::spawn_blocking(move || drive(&rig, &command, &stop))
    };
    tokio::pin!(worker);

    tokio::select! {
        result = &mut worker => return result.context("motion task panicked")?,
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received shutdown signal"),
                Err(e) => error!("unable to listen for shutdown signal: {}", e),
            }
            stop.store(true, Ordering::SeqCst);
        }
    }

    worker.await.context("motion task panicked")?
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn drive(rig: &RigConfig, command: &Command, stop: &AtomicBool) -> anyhow::Result<()> {
    match rig.shift_register.registers {
        1 => drive_chain::<1>(rig, command, stop),
        2 => drive_chain::<2>(rig, command, stop),
        3 => drive_chain::<3>(rig, command, stop),
        4 => drive_chain::<4>(rig, command, stop),
        n => bail!("unsupported register count {n}"),
    }
}

fn drive_chain<const N: usize>(
    rig: &RigConfig,
    command: &Command,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let gpio = Gpio::new().context("failed to initialize GPIO")?;
    let output = |pin: u8| -> anyhow::Result<RppalOutputPin> {
        Ok(gpio
            .get(pin)
            .with_context(|| format!("failed to get GPIO pin {pin}"))?
            .into_output_low())
    };
    let sr = &rig.shift_register;
    let register: Register<N> = ShiftRegister::new(
        output(sr.data_pin)?,
        output(sr.clock_pin)?,
        output(sr.latch_pin)?,
    );
    let sink = RefCell::new(register);
    let clock = MonotonicClock::new();

    let result = run_command(rig, command, &sink, &clock, stop);

    // de-energize every coil, also after a failed or interrupted move
    sink.borrow_mut().set_all(false);
    result
}

fn run_command<S, C>(
    rig: &RigConfig,
    command: &Command,
    sink: S,
    clock: C,
    stop: &AtomicBool,
) -> anyhow::Result<()>
where
    S: OutputSink + Copy,
    C: Clock + Copy,
{
    match command {
        Command::Move {
            motor,
            steps,
            rpm,
            blocking,
        } => {
            let config = rig
                .find_motor(motor)
                .with_context(|| format!("no motor named {motor:?} in the rig"))?;
            let mut channel = config.channel(sink, clock, *rpm)?;
            if *blocking {
                let steps = i32::try_from(*steps).context("step count too large for a blocking move")?;
                info!(motor = %motor, steps, "blocking move");
                channel.step(&mut Delay, steps)?;
                info!(motor = %motor, position = channel.position(), "move finished");
                Ok(())
            } else {
                channel.step_async(*steps)?;
                info!(motor = %motor, steps, "move started");
                run_loop(vec![(motor.clone(), channel)], stop);
                Ok(())
            }
        }
        Command::Run { moves } => {
            let mut channels: Vec<(String, StepperChannel<S, C>)> = Vec::with_capacity(moves.len());
            for (motor, steps) in moves {
                if channels.iter().any(|(name, _)| name == motor) {
                    bail!("motor {motor:?} given more than once");
                }
                let config = rig
                    .find_motor(motor)
                    .with_context(|| format!("no motor named {motor:?} in the rig"))?;
                let mut channel = config.channel(sink, clock, None)?;
                channel.step_async(*steps)?;
                info!(motor = %motor, steps, "move started");
                channels.push((motor.clone(), channel));
            }
            run_loop(channels, stop);
            Ok(())
        }
    }
}

/// Cooperative control loop: one `update()` per channel per pass until every
/// move is done or a stop is requested.
fn run_loop<S, C>(mut channels: Vec<(String, StepperChannel<S, C>)>, stop: &AtomicBool)
where
    S: OutputSink,
    C: Clock,
{
    while channels.iter().any(|(_, channel)| channel.is_running()) {
        if stop.load(Ordering::Relaxed) {
            for (name, channel) in channels.iter().filter(|(_, ch)| ch.is_running()) {
                warn!(
                    motor = %name,
                    remaining = channel.steps_remaining(),
                    "stopped before the move finished"
                );
            }
            return;
        }
        for (name, channel) in channels.iter_mut() {
            if channel.update() && !channel.is_running() {
                info!(motor = %name, position = channel.position(), "move finished");
            }
        }
        std::hint::spin_loop();
    }
}

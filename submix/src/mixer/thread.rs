//! Mixing thread body
//!
//! Run-state requests are only observed between ticks: a tick in progress
//! always completes. While no port has data the thread blocks on the shared
//! condition variable; otherwise every tick is paced by the virtual clock.

use super::clock::PacingClock;
use super::core::Shared;
use super::engine::TickRunner;
use super::types::RunState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the handshake decided for the next loop iteration
enum Next {
    Tick,
    Exit,
}

pub(crate) fn run(shared: Arc<Shared>, mut runner: TickRunner) {
    let mut clock = PacingClock::for_period(
        shared.config.period_frames,
        shared.output_config.sample_rate,
        shared.config.preroll_periods,
    );
    info!(
        "Mixer thread running: {} output, tick every {:?}",
        runner.format(),
        clock.period()
    );

    loop {
        if let Next::Exit = handshake(&shared, &mut clock) {
            break;
        }

        let drain = shared.take_drain();
        if let Err(e) = shared.tick_once(&mut runner, drain) {
            warn!("Mixer tick failed: {}", e);
        }
        clock.sleep_tick();
    }

    info!(
        "Mixer thread exiting after {} ticks ({} clock re-anchors)",
        shared.ticks.load(Ordering::Relaxed),
        clock.reanchors()
    );
}

/// Settle run-state requests and wait for work; returns once a tick should run
fn handshake(shared: &Shared, clock: &mut PacingClock) -> Next {
    let mut control = shared.control.lock();
    loop {
        match control.run_state {
            RunState::ReqExit | RunState::Exited => return Next::Exit,
            RunState::ReqSleep => {
                if let Err(e) = shared.output.lock().standby() {
                    warn!("Output standby failed: {}", e);
                }
                control.run_state = RunState::Sleep;
                shared.wake.notify_all();
                info!("Mixer thread sleeping");
            }
            RunState::Sleep => {
                shared.wake.wait(&mut control);
            }
            RunState::ReqRun => {
                control.run_state = RunState::Running;
                clock.reset();
                shared.wake.notify_all();
                info!("Mixer thread running again");
            }
            RunState::Running => {
                let idle = control.drain.is_none()
                    && !shared.continuous_output.load(Ordering::Relaxed)
                    && shared.compute_state(None).may_wait();
                if !idle {
                    return Next::Tick;
                }
                debug!("Mixer idle, waiting for input");
                clock.reset();
                shared.wake.wait(&mut control);
            }
        }
    }
}

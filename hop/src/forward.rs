//! Duplex forwarding step shared by both directions of a tunnel session.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hop_proto::CamouflageMode;
use tokio::sync::Mutex;

use crate::endpoint::{Endpoint, ReadOutcome};

/// Number of failure points at which a direction gives up, tearing the whole session down
pub const FAILURE_THRESHOLD: u32 = 5;

pub const CLOSED_PENALTY: u32 = 1;

pub const VIOLATION_PENALTY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local to remote"),
            Direction::RemoteToLocal => write!(f, "remote to local"),
        }
    }
}

/// Diagnostic label of a direction, named after the modes on both ends.
pub fn direction_label(src: CamouflageMode, dst: CamouflageMode) -> &'static str {
    match (src, dst) {
        (CamouflageMode::Plain, CamouflageMode::Http) => "PlainToHTTP",
        (CamouflageMode::Http, CamouflageMode::Plain) => "HTTPtoPlain",
        (CamouflageMode::Http, CamouflageMode::Http) => "HTTPtoHTTP",
        (CamouflageMode::Plain, CamouflageMode::Plain) => "PlainToPlain",
    }
}

/// Per-direction bookkeeping, only ever mutated by its own forwarding step
#[derive(Debug)]
pub struct DirectionState {
    direction: Direction,
    label: &'static str,
    failures: u32,
    steps: u64,
    running: Arc<AtomicBool>,
    // Observed only for diagnostics.
    peer_running: Arc<AtomicBool>,
}

impl DirectionState {
    /// Creates the two states of a session, each observing the liveness flag of the other.
    pub fn pair(local_to_remote: &'static str, remote_to_local: &'static str) -> (Self, Self) {
        let l2r_running = Arc::new(AtomicBool::new(true));
        let r2l_running = Arc::new(AtomicBool::new(true));

        let l2r = Self {
            direction: Direction::LocalToRemote,
            label: local_to_remote,
            failures: 0,
            steps: 0,
            running: Arc::clone(&l2r_running),
            peer_running: Arc::clone(&r2l_running),
        };

        let r2l = Self {
            direction: Direction::RemoteToLocal,
            label: remote_to_local,
            failures: 0,
            steps: 0,
            running: r2l_running,
            peer_running: l2r_running,
        };

        (l2r, r2l)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_peer_running(&self) -> bool {
        self.peer_running.load(Ordering::Relaxed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= FAILURE_THRESHOLD
    }

    /// Applies the failure counting rules for one read outcome.
    pub fn account(&mut self, outcome: &ReadOutcome) {
        match outcome {
            ReadOutcome::Empty => self.failures = 0,
            ReadOutcome::Closed => self.charge(CLOSED_PENALTY),
            ReadOutcome::Violation(_) => self.charge(VIOLATION_PENALTY),
            ReadOutcome::Message(_) => {}
        }
    }

    pub(crate) fn charge(&mut self, penalty: u32) {
        self.failures = self.failures.saturating_add(penalty);
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepCfg {
    /// Upper bound on the time spent waiting for a message while holding the session lock
    pub poll_timeout: Duration,
    /// Pause after each step
    pub step_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Writing to the destination failed.
    BrokenPipe,
}

/// Performs one read from `src` under the session lock, then forwards the message to `dst`.
pub async fn step(
    lock: &Mutex<()>,
    src: &mut Endpoint,
    dst: &mut Endpoint,
    state: &mut DirectionState,
    cfg: &StepCfg,
) -> StepOutcome {
    let outcome = {
        let _guard = lock.lock().await;
        src.read_message(cfg.poll_timeout).await
    };

    state.steps += 1;
    state.account(&outcome);

    let label = state.label;

    match outcome {
        ReadOutcome::Empty => {
            trace!(label, "Nothing to forward");
        }
        ReadOutcome::Closed => {
            debug!(label, failures = state.failures, "Read failed: socket closed");
        }
        ReadOutcome::Violation(error) => {
            debug!(label, failures = state.failures, %error, "Read failed: protocol violation");
        }
        ReadOutcome::Message(message) => {
            trace!(label, tag = %message.tag, len = message.len(), "Forwarding message");

            if let Err(error) = dst.write_message(&message).await {
                warn!(label, %error, "Broken pipe");
                return StepOutcome::BrokenPipe;
            }
        }
    }

    tokio::time::sleep(cfg.step_delay).await;

    StepOutcome::Continue
}

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::endpoint::{Endpoint, PlainWire};
use crate::forward::{self, Direction, DirectionState, StepCfg, StepOutcome, direction_label};
use crate::handshake;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(1);
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Value of the role argument selecting the server role
pub const SERVER_FLAG: &str = "SERVER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Plain local leg, HTTP remote leg
    Client,
    /// HTTP local leg, plain remote leg
    Server,
}

impl Role {
    /// Any value other than [`SERVER_FLAG`], and no value at all, select the client role.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(SERVER_FLAG) => Role::Server,
            _ => Role::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionCfg {
    pub role: Role,
    pub remote_host: String,
    pub remote_port: u16,
    pub plain_wire: PlainWire,
    pub poll_timeout: Duration,
    pub step_delay: Duration,
    pub drain_delay: Duration,
    pub handshake_timeout: Duration,
}

impl SessionCfg {
    pub fn new(role: Role, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            role,
            remote_host: remote_host.into(),
            remote_port,
            plain_wire: PlainWire::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            step_delay: DEFAULT_STEP_DELAY,
            drain_delay: DEFAULT_DRAIN_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// `host:port`, also used as the `Host` header of outgoing requests.
    pub fn remote_addr(&self) -> String {
        if self.remote_host.contains(':') && !self.remote_host.starts_with('[') {
            format!("[{}]:{}", self.remote_host, self.remote_port)
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }

    fn step_cfg(&self) -> StepCfg {
        StepCfg {
            poll_timeout: self.poll_timeout,
            step_delay: self.step_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    FailureThreshold(Direction),
    BrokenPipe(Direction),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::FailureThreshold(direction) => write!(f, "failure threshold reached ({direction})"),
            TerminationReason::BrokenPipe(direction) => write!(f, "broken pipe ({direction})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub label: &'static str,
    pub steps: u64,
    pub failures: u32,
    pub running: bool,
}

impl From<&DirectionState> for DirectionReport {
    fn from(state: &DirectionState) -> Self {
        Self {
            label: state.label(),
            steps: state.steps(),
            failures: state.failures(),
            running: state.is_running(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: TerminationReason,
    pub local_to_remote: DirectionReport,
    pub remote_to_local: DirectionReport,
}

/// Both legs of one accepted connection
#[derive(Debug)]
pub struct TunnelSession {
    local: Endpoint,
    remote: Endpoint,
    cfg: Arc<SessionCfg>,
    lock: Mutex<()>,
}

impl TunnelSession {
    pub fn new(local: Endpoint, remote: Endpoint, cfg: Arc<SessionCfg>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            local.mode() != remote.mode(),
            "both legs use the {} camouflage mode",
            local.mode()
        );

        Ok(Self {
            local,
            remote,
            cfg,
            lock: Mutex::new(()),
        })
    }

    /// Runs the handshake, forwards in both directions until the session is no longer viable, then
    /// closes the remote leg followed by the local one.
    pub async fn run(self) -> SessionReport {
        let Self {
            mut local,
            mut remote,
            cfg,
            lock,
        } = self;

        let (mut l2r, mut r2l) = DirectionState::pair(
            direction_label(local.mode(), remote.mode()),
            direction_label(remote.mode(), local.mode()),
        );

        let reason = match perform_handshake(&mut local, &mut remote, &mut l2r, &cfg).await {
            Ok(()) => {
                info!(role = %cfg.role, "Handshake completed");
                forward_until_done(&lock, &mut local, &mut remote, &mut l2r, &mut r2l, &cfg.step_cfg()).await
            }
            Err(reason) => reason,
        };

        l2r.stop();
        r2l.stop();

        info!(%reason, "Tearing down session");

        tokio::time::sleep(cfg.drain_delay).await;
        remote.close().await;
        tokio::time::sleep(cfg.drain_delay).await;
        local.close().await;

        SessionReport {
            reason,
            local_to_remote: DirectionReport::from(&l2r),
            remote_to_local: DirectionReport::from(&r2l),
        }
    }
}

/// A failed handshake is charged to the local to remote direction, like any other read failure.
async fn perform_handshake(
    local: &mut Endpoint,
    remote: &mut Endpoint,
    l2r: &mut DirectionState,
    cfg: &SessionCfg,
) -> Result<(), TerminationReason> {
    match cfg.role {
        Role::Client => handshake::send_hello(remote).await.map_err(|error| {
            warn!(%error, "Couldn't send hello");
            TerminationReason::BrokenPipe(Direction::LocalToRemote)
        }),
        Role::Server => {
            // Without a representable deadline, wait forever.
            let deadline = Instant::now().checked_add(cfg.handshake_timeout);

            loop {
                let Err(error) = handshake::receive_hello(local, cfg.poll_timeout, deadline).await else {
                    return Ok(());
                };

                l2r.charge(error.penalty());
                debug!(%error, failures = l2r.failures(), "No hello received");

                if l2r.is_exhausted() {
                    warn!(%error, "Handshake failed");
                    return Err(TerminationReason::FailureThreshold(Direction::LocalToRemote));
                }
            }
        }
    }
}

async fn forward_until_done(
    lock: &Mutex<()>,
    local: &mut Endpoint,
    remote: &mut Endpoint,
    l2r: &mut DirectionState,
    r2l: &mut DirectionState,
    cfg: &StepCfg,
) -> TerminationReason {
    loop {
        if forward::step(lock, local, remote, l2r, cfg).await == StepOutcome::BrokenPipe {
            return TerminationReason::BrokenPipe(Direction::LocalToRemote);
        }

        if forward::step(lock, remote, local, r2l, cfg).await == StepOutcome::BrokenPipe {
            return TerminationReason::BrokenPipe(Direction::RemoteToLocal);
        }

        if l2r.is_exhausted() {
            return TerminationReason::FailureThreshold(Direction::LocalToRemote);
        }

        if r2l.is_exhausted() {
            return TerminationReason::FailureThreshold(Direction::RemoteToLocal);
        }
    }
}

/// Connects to the configured remote and runs a session for an accepted connection.
pub async fn run_session(stream: TcpStream, cfg: Arc<SessionCfg>) -> anyhow::Result<SessionReport> {
    let remote_addr = cfg.remote_addr();

    let remote_stream = TcpStream::connect(&remote_addr)
        .await
        .with_context(|| format!("couldn't connect to {remote_addr}"))?;

    debug!(%remote_addr, "Connected to remote");

    let (local, remote) = match cfg.role {
        Role::Client => {
            let remote = Endpoint::http_client(remote_stream, &remote_addr).context("invalid remote host")?;
            (Endpoint::plain(stream, cfg.plain_wire), remote)
        }
        Role::Server => (Endpoint::http_server(stream), Endpoint::plain(remote_stream, cfg.plain_wire)),
    };

    let session = TunnelSession::new(local, remote, cfg)?;

    Ok(session.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_flag() {
        assert_eq!(Role::from_flag(None), Role::Client);
        assert_eq!(Role::from_flag(Some("SERVER")), Role::Server);
        assert_eq!(Role::from_flag(Some("server")), Role::Client);
        assert_eq!(Role::from_flag(Some("CLIENT")), Role::Client);
    }

    #[test]
    fn remote_addr() {
        assert_eq!(SessionCfg::new(Role::Client, "10.0.0.2", 2222).remote_addr(), "10.0.0.2:2222");
        assert_eq!(SessionCfg::new(Role::Client, "::1", 22).remote_addr(), "[::1]:22");
        assert_eq!(SessionCfg::new(Role::Client, "[::1]", 22).remote_addr(), "[::1]:22");
    }

    #[test]
    fn same_modes_are_rejected() {
        let (a, b) = tokio::io::duplex(64);
        let cfg = Arc::new(SessionCfg::new(Role::Client, "localhost", 22));

        let res = TunnelSession::new(
            Endpoint::plain(a, PlainWire::Raw),
            Endpoint::plain(b, PlainWire::Framed),
            cfg,
        );
        assert!(res.is_err());
    }
}

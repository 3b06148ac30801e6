// Used by the hop binary.
use {humantime as _, seahorse as _, tracing_appender as _, tracing_subscriber as _};

// Used by tests
#[cfg(test)]
use {proptest as _, test_utils as _};

#[macro_use]
extern crate tracing;

mod codec;
pub mod endpoint;
pub mod forward;
pub mod handshake;
pub mod listener;
pub mod session;

use std::sync::Arc;

use session::SessionCfg;

#[derive(Debug, Clone)]
pub struct TunnelCfg {
    pub listen_port: u16,
    pub session: SessionCfg,
}

/// Serves tunnel sessions until an interrupt signal is received.
#[instrument(skip_all, fields(role = %cfg.session.role))]
pub async fn run_tunnel(cfg: TunnelCfg) -> anyhow::Result<()> {
    use anyhow::Context as _;

    info!("Running as {}", cfg.session.role);

    let listener = listener::listen(cfg.listen_port).await?;
    let session_cfg = Arc::new(cfg.session);

    tokio::select! {
        () = listener::accept_loop(listener, session_cfg) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("couldn't listen for the interrupt signal")?;
            info!("Closing socket");
        }
    }

    Ok(())
}

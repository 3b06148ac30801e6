use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument as _;

use crate::session::{SessionCfg, run_session};

/// Binds the listening socket on all interfaces.
pub async fn listen(port: u16) -> anyhow::Result<TcpListener> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("couldn't bind listener to {bind_addr}"))?;

    info!(%bind_addr, "Listening");

    Ok(listener)
}

/// Accepts connections forever, running each session in its own task.
pub async fn accept_loop(listener: TcpListener, cfg: Arc<SessionCfg>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => spawn_session(stream, addr, Arc::clone(&cfg)),
            Err(error) => {
                error!(%error, "Couldn't accept next TCP stream");
            }
        }
    }
}

fn spawn_session(stream: TcpStream, addr: SocketAddr, cfg: Arc<SessionCfg>) {
    tokio::spawn(
        async move {
            info!("Accepted connection");

            match run_session(stream, cfg).await {
                Ok(report) => info!(
                    reason = %report.reason,
                    l2r_steps = report.local_to_remote.steps,
                    r2l_steps = report.remote_to_local.steps,
                    "Session ended"
                ),
                Err(e) => warn!(error = format!("{e:#}"), "Session failed"),
            }
        }
        .instrument(info_span!("session", %addr)),
    );
}

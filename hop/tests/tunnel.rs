#![allow(unused_crate_dependencies)]
#![expect(clippy::unwrap_used, reason = "test code can panic on errors")]

use core::time::Duration;
use std::net::SocketAddr;
use std::sync::Arc;

use hop::endpoint::PlainWire;
use hop::listener::{accept_loop, listen};
use hop::session::{Role, SessionCfg};
use test_utils::{every_byte_value, read_assert_payload, write_payload};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Echoes everything back, like the application behind the server side.
async fn spawn_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();

            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, handle)
}

/// Starts a tunnel endpoint on an ephemeral port and returns its port.
async fn spawn_tunnel(role: Role, remote_port: u16, plain_wire: PlainWire) -> (u16, JoinHandle<()>) {
    let listener = listen(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut cfg = SessionCfg::new(role, "127.0.0.1", remote_port);
    cfg.plain_wire = plain_wire;
    cfg.drain_delay = Duration::from_millis(10);

    let handle = tokio::spawn(accept_loop(listener, Arc::new(cfg)));

    (port, handle)
}

/// application → client tunnel → server tunnel → echo server
async fn spawn_chain() -> (u16, [JoinHandle<()>; 3]) {
    let (echo_addr, echo) = spawn_echo_server().await;
    let (server_port, server) = spawn_tunnel(Role::Server, echo_addr.port(), PlainWire::Raw).await;
    let (client_port, client) = spawn_tunnel(Role::Client, server_port, PlainWire::Raw).await;
    (client_port, [echo, server, client])
}

#[tokio::test]
async fn ping_pong_through_both_tunnels() {
    let (port, handles) = spawn_chain().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(b"PING").await.unwrap();

    let mut buf = [0; 4];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"PING");

    handles.iter().for_each(JoinHandle::abort);
}

#[tokio::test]
async fn every_byte_value_is_carried() {
    let (port, handles) = spawn_chain().await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    let payload = every_byte_value();

    write_payload(&mut writer, &payload).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), read_assert_payload(&mut reader, &payload))
        .await
        .unwrap()
        .unwrap();

    handles.iter().for_each(JoinHandle::abort);
}

#[tokio::test]
async fn large_stream_spans_many_messages() {
    let (port, handles) = spawn_chain().await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    let payload: Vec<u8> = (0..60_000u32).map(|i| u8::try_from(i % 251).unwrap()).collect();

    let writer_task = tokio::spawn({
        let payload = payload.clone();
        async move { write_payload(&mut writer, &payload).await.unwrap() }
    });

    tokio::time::timeout(Duration::from_secs(30), read_assert_payload(&mut reader, &payload))
        .await
        .unwrap()
        .unwrap();

    writer_task.await.unwrap();
    handles.iter().for_each(JoinHandle::abort);
}

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let (port, handles) = spawn_chain().await;

    let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    first.write_all(b"first").await.unwrap();
    second.write_all(b"second").await.unwrap();

    let mut buf = [0; 6];
    tokio::time::timeout(Duration::from_secs(5), second.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"second");

    // Closing one session leaves the other usable.
    drop(second);

    first.write_all(b" again").await.unwrap();
    let mut buf = [0; 11];
    tokio::time::timeout(Duration::from_secs(5), first.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"first again");

    handles.iter().for_each(JoinHandle::abort);
}

#[tokio::test]
async fn server_tunnel_drops_plain_clients() {
    let (echo_addr, echo) = spawn_echo_server().await;
    let (server_port, server) = spawn_tunnel(Role::Server, echo_addr.port(), PlainWire::Raw).await;

    let mut stream = TcpStream::connect(("127.0.0.1", server_port)).await.unwrap();
    stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();

    // The session is torn down without ever forwarding the bytes.
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    echo.abort();
    server.abort();
}

use core::time::Duration;
use std::io;

use hop_proto::Message;
use tokio::time::Instant;

use crate::endpoint::{Endpoint, ReadOutcome};
use crate::forward::{CLOSED_PENALTY, VIOLATION_PENALTY};

#[derive(Debug)]
pub enum HandshakeError {
    /// The peer went away, or stayed silent past the deadline.
    TransportClosed,
    /// Something other than a hello was received.
    ProtocolViolation(Option<hop_proto::Error>),
}

impl HandshakeError {
    /// Failure points charged to the direction the hello was expected on
    pub fn penalty(&self) -> u32 {
        match self {
            HandshakeError::TransportClosed => CLOSED_PENALTY,
            HandshakeError::ProtocolViolation(_) => VIOLATION_PENALTY,
        }
    }
}

impl core::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HandshakeError::TransportClosed => write!(f, "transport closed before hello"),
            HandshakeError::ProtocolViolation(Some(error)) => write!(f, "protocol violation: {error}"),
            HandshakeError::ProtocolViolation(None) => write!(f, "protocol violation: hello expected"),
        }
    }
}

impl std::error::Error for HandshakeError {}

pub async fn send_hello(endpoint: &mut Endpoint) -> io::Result<()> {
    endpoint.write_message(&Message::hello()).await
}

/// Waits for the hello message until `deadline` is reached, or forever without one.
///
/// Empty messages and poll timeouts are skipped.
pub async fn receive_hello(
    endpoint: &mut Endpoint,
    poll_timeout: Duration,
    deadline: Option<Instant>,
) -> Result<(), HandshakeError> {
    loop {
        match endpoint.read_message(poll_timeout).await {
            ReadOutcome::Message(message) if message.is_hello() => return Ok(()),
            ReadOutcome::Message(message) => {
                debug!(tag = %message.tag, len = message.len(), "Unexpected message during handshake");
                return Err(HandshakeError::ProtocolViolation(None));
            }
            ReadOutcome::Violation(error) => return Err(HandshakeError::ProtocolViolation(Some(error))),
            ReadOutcome::Closed => return Err(HandshakeError::TransportClosed),
            ReadOutcome::Empty => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(HandshakeError::TransportClosed);
                }
            }
        }
    }
}

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::io;

use futures_util::{SinkExt as _, StreamExt as _};
use hop_proto::{CamouflageMode, Codec, MAX_FRAME_SIZE, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::LegCodec;

pub type ErasedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type ErasedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// How a PLAIN leg is carried on the socket facing the tunneled application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlainWire {
    /// Bare payload bytes, as expected by a stock application (e.g. an SSH client or server).
    #[default]
    Raw,
    /// Payload prefixed with the PLAIN frame header.
    Framed,
}

impl FromStr for PlainWire {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(PlainWire::Raw),
            "framed" => Ok(PlainWire::Framed),
            _ => anyhow::bail!("unknown plain wire `{s}` (expected `raw` or `framed`)"),
        }
    }
}

impl fmt::Display for PlainWire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlainWire::Raw => write!(f, "raw"),
            PlainWire::Framed => write!(f, "framed"),
        }
    }
}

/// Result of a single read operation on an [`Endpoint`]
///
/// Transport errors never surface as such: they are reported as `Closed`.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Nothing to forward: either an empty message or no complete message within the poll timeout.
    Empty,
    Closed,
    Violation(hop_proto::Error),
    Message(Message),
}

/// One end of a live connection, plus its camouflage mode
pub struct Endpoint {
    reader: FramedRead<ErasedRead, LegCodec>,
    writer: FramedWrite<ErasedWrite, LegCodec>,
    mode: CamouflageMode,
    // The framed reader yields one `None` right after an IO error.
    io_errored: bool,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("mode", &self.mode)
            .field("inbound", &self.reader.decoder().inner().map(Codec::framing))
            .field("outbound", &self.writer.encoder().inner().map(Codec::framing))
            .field("buffered", &self.reader.read_buffer().len())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// HTTP leg opened by the client: requests go out, responses come back.
    pub fn http_client<S>(stream: S, host: &str) -> Result<Self, hop_proto::Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let outbound = Codec::http_request(host)?;
        Ok(Self::from_stream(
            stream,
            CamouflageMode::Http,
            LegCodec::framed(Codec::http_response()),
            LegCodec::framed(outbound),
        ))
    }

    /// HTTP leg accepted by the server: requests come in, responses go out.
    pub fn http_server<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_stream(
            stream,
            CamouflageMode::Http,
            LegCodec::framed(Codec::http_request_receiver()),
            LegCodec::framed(Codec::http_response()),
        )
    }

    pub fn plain<S>(stream: S, wire: PlainWire) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = match wire {
            PlainWire::Raw => LegCodec::raw(),
            PlainWire::Framed => LegCodec::framed(Codec::plain()),
        };
        Self::from_stream(stream, CamouflageMode::Plain, codec.clone(), codec)
    }

    fn from_stream<S>(stream: S, mode: CamouflageMode, inbound: LegCodec, outbound: LegCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let reader: ErasedRead = Box::new(reader);
        let writer: ErasedWrite = Box::new(writer);

        Self {
            reader: FramedRead::with_capacity(reader, inbound, MAX_FRAME_SIZE),
            writer: FramedWrite::new(writer, outbound),
            mode,
            io_errored: false,
        }
    }

    pub fn mode(&self) -> CamouflageMode {
        self.mode
    }

    /// Performs one read operation, waiting at most `poll_timeout` for a complete message.
    ///
    /// Bytes of an incomplete frame are kept for the next call. After a protocol violation, the
    /// buffered bytes are discarded. A closed transport is reported on every read until new bytes
    /// show up.
    pub async fn read_message(&mut self, poll_timeout: Duration) -> ReadOutcome {
        if self.io_errored {
            self.io_errored = false;
            let _ = tokio::time::timeout(Duration::ZERO, self.reader.next()).await;
        }

        match tokio::time::timeout(poll_timeout, self.reader.next()).await {
            Err(_elapsed) => ReadOutcome::Empty,
            Ok(None) => ReadOutcome::Closed,
            Ok(Some(Err(error))) => {
                debug!(%error, "Transport error");
                self.io_errored = true;
                ReadOutcome::Closed
            }
            Ok(Some(Ok(Err(error)))) => ReadOutcome::Violation(error),
            Ok(Some(Ok(Ok(message)))) if message.is_empty() => ReadOutcome::Empty,
            Ok(Some(Ok(Ok(message)))) => {
                trace!(len = message.len(), tag = %message.tag, "Read message");
                ReadOutcome::Message(message)
            }
        }
    }

    pub async fn write_message(&mut self, message: &Message) -> io::Result<()> {
        self.writer.send(message.clone()).await
    }

    pub async fn close(mut self) {
        if let Err(error) = self.writer.close().await {
            debug!(%error, "Shutdown failed");
        }
    }
}

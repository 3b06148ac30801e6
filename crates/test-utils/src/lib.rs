use anyhow::Context as _;
use proptest::collection::size_range;
use proptest::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// For sane Debug display
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct Payload(pub Vec<u8>);

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x")?;
        for v in self.0.iter().take(15) {
            write!(f, "{:X?}", v)?;
        }
        write!(f, "..({} bytes)", self.0.len())
    }
}

/// Same bound as `hop_proto::MAX_PAYLOAD_SIZE`.
pub const MESSAGE_MAXIMUM_SIZE: usize = 16 * 1024;

const SMALL_MAXIMUM_SIZE: usize = 512;

const STREAM_MINIMUM_SIZE: usize = 256;
const STREAM_MAXIMUM_SIZE: usize = 24 * 256 * 144; // approximately the size of a 144p 24bpp BMP image

prop_compose! {
    /// Anything fitting in a single message, the empty payload included.
    pub fn message_payload()(data in any_with::<Vec<u8>>(size_range(0..=MESSAGE_MAXIMUM_SIZE).lift())) -> Payload {
        Payload(data)
    }
}

prop_compose! {
    pub fn small_payload()(data in any_with::<Vec<u8>>(size_range(1..=SMALL_MAXIMUM_SIZE).lift())) -> Payload {
        Payload(data)
    }
}

prop_compose! {
    /// A byte stream spanning many messages.
    pub fn stream_payload()(data in any_with::<Vec<u8>>(size_range(STREAM_MINIMUM_SIZE..STREAM_MAXIMUM_SIZE).lift())) -> Payload {
        Payload(data)
    }
}

pub fn tag_value() -> impl Strategy<Value = u8> {
    any::<u8>()
}

/// Every byte value from 0 to 255, in order.
pub fn every_byte_value() -> Vec<u8> {
    (0..=u8::MAX).collect()
}

/// Returns a connected pair of localhost TCP streams: (client side, server side).
pub async fn tcp_pair() -> anyhow::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;

    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = client.context("connect operation")?;
    let (server, _) = accepted.context("accept operation")?;

    Ok((client, server))
}

pub async fn write_payload<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut cursor = 0;
    while cursor < payload.len() {
        let from = cursor;
        let to = core::cmp::min(payload.len(), cursor + 9999);
        writer
            .write_all(&payload[from..to])
            .await
            .context("write_all operation")?;
        cursor = to;
    }
    writer.flush().await.context("Flush operation")?;

    Ok(())
}

pub async fn read_assert_payload<R: AsyncRead + Unpin>(reader: &mut R, expected_payload: &[u8]) -> anyhow::Result<()> {
    use tokio::io::AsyncReadExt;

    let mut buf = [0; 5120];
    let mut current_idx = 0;
    loop {
        if current_idx == expected_payload.len() {
            break;
        }

        let n = reader.read(&mut buf).await.context("read operation")?;
        if n == 0 {
            anyhow::bail!(
                "Read {current_idx} bytes, but expected exactly {} bytes",
                expected_payload.len()
            );
        }

        let from = current_idx;
        let to = current_idx + n;

        if to > expected_payload.len() {
            anyhow::bail!("Received too much bytes");
        }

        if expected_payload[from..to] != buf[..n] {
            anyhow::bail!("Received bytes didn't match expected payload ({from}..{to})");
        }

        current_idx += n;
    }

    Ok(())
}

//! Camouflage framing for the hop tunnel.
//!
//! A [`Message`] is an opaque payload plus a small provenance [`Tag`]. It travels on the wire using
//! one of the following [`Framing`]s:
//!
//! - `Plain`: a 4-byte header (`tag`, big endian `size`, reserved byte) directly followed by the payload.
//! - `HttpRequest`: a `POST` request whose body is the payload and whose `X-Request-Id` header is the tag.
//! - `HttpResponse`: a `200 OK` response carrying the payload the same way.
//!
//! Every framing is self-delimiting, so [`Codec::decode_buf`] can be fed a raw byte stream.

mod http;
mod utils;

use core::fmt;

use bytes::{Buf as _, BufMut as _};
use smol_str::SmolStr;

// We re-export these types, because they are used in the public API.
#[rustfmt::skip]
pub use bytes::{Bytes, BytesMut};

/// Largest payload a single message may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Largest HTTP head (start line and headers, including the empty line) accepted by the decoder.
pub const MAX_HEAD_SIZE: usize = 1024;

/// Size of a transfer buffer able to hold any single frame.
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD_SIZE + MAX_HEAD_SIZE;

/// Provenance tag carried alongside each payload
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Tag(u8);

impl Tag {
    /// Regular tunneled data
    pub const DATA: Self = Tag(0);

    /// Session opening announcement
    pub const HELLO: Self = Tag(1);
}

impl From<u8> for Tag {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: Tag,
    pub payload: Bytes,
}

impl Message {
    /// Payload of the hello message sent by the client when a session starts.
    pub const HELLO_PAYLOAD: &'static [u8] = b"HOP/1 hello";

    pub fn new(tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::new(Tag::DATA, payload)
    }

    pub fn hello() -> Self {
        Self::new(Tag::HELLO, Bytes::from_static(Self::HELLO_PAYLOAD))
    }

    pub fn is_hello(&self) -> bool {
        self.tag == Tag::HELLO && self.payload == Self::HELLO_PAYLOAD
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Whether the bytes of a connection leg are disguised as HTTP or minimally framed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CamouflageMode {
    Http,
    Plain,
}

impl fmt::Display for CamouflageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CamouflageMode::Http => write!(f, "HTTP"),
            CamouflageMode::Plain => write!(f, "PLAIN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    Plain,
    HttpRequest,
    HttpResponse,
}

impl Framing {
    pub fn mode(self) -> CamouflageMode {
        match self {
            Framing::Plain => CamouflageMode::Plain,
            Framing::HttpRequest | Framing::HttpResponse => CamouflageMode::Http,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Framing::Plain => PlainHeader::NAME,
            Framing::HttpRequest => http::REQUEST_NAME,
            Framing::HttpResponse => http::RESPONSE_NAME,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    PayloadOversized {
        payload_size: usize,
        max: usize,
    },
    HeadOversized {
        name: &'static str,
        max: usize,
    },
    IncompleteHead {
        name: &'static str,
        received: usize,
    },
    NotEnoughBytes {
        name: &'static str,
        received: usize,
        expected: usize,
    },
    TrailingBytes {
        name: &'static str,
        count: usize,
    },
    InvalidFrame {
        name: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PayloadOversized { payload_size, max } => {
                write!(f, "payload oversized: max is {max}, got {payload_size}")
            }
            Error::HeadOversized { name, max } => write!(f, "{name} head exceeds {max} bytes"),
            Error::IncompleteHead { name, received } => {
                write!(f, "{name} head is incomplete after {received} bytes")
            }
            Error::NotEnoughBytes {
                name,
                received,
                expected,
            } => write!(
                f,
                "not enough bytes provided to decode {name}: received {received} bytes, expected {expected} bytes"
            ),
            Error::TrailingBytes { name, count } => write!(f, "{count} unexpected bytes after {name}"),
            Error::InvalidFrame { name, field, reason } => {
                write!(f, "invalid `{field}` in {name}: {reason}")
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct PlainHeader {
    pub tag: Tag,
    pub size: u16,
    pub reserved: u8,
}

impl PlainHeader {
    pub const NAME: &'static str = "PLAIN HEADER";
    pub const SIZE: usize = 1 /* tag */ + 2 /* size */ + 1 /* reserved */;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(self.tag));
        buf.put_u16(self.size);
        buf.put_u8(0);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::SIZE {
            return Err(Error::NotEnoughBytes {
                name: Self::NAME,
                received: buf.len(),
                expected: Self::SIZE,
            });
        }

        let header = Self {
            tag: Tag::from(buf.get_u8()),
            size: buf.get_u16(),
            reserved: buf.get_u8(),
        };

        if header.reserved != 0 {
            return Err(Error::InvalidFrame {
                name: Self::NAME,
                field: "reserved",
                reason: "must be zero",
            });
        }

        if usize::from(header.size) > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadOversized {
                payload_size: usize::from(header.size),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(header)
    }
}

/// Where the payload of a frame sits, once its head has been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) tag: Tag,
    pub(crate) head_size: usize,
    pub(crate) body_size: usize,
}

impl Layout {
    fn frame_size(&self) -> usize {
        self.head_size + self.body_size
    }
}

/// Encoder and decoder for a single [`Framing`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    framing: Framing,
    host: SmolStr,
}

impl Codec {
    pub fn plain() -> Self {
        Self {
            framing: Framing::Plain,
            host: SmolStr::default(),
        }
    }

    /// Codec producing HTTP requests, with `host` as the value of the `Host` header.
    pub fn http_request(host: &str) -> Result<Self, Error> {
        http::validate_host(host)?;

        Ok(Self {
            framing: Framing::HttpRequest,
            host: SmolStr::new(host),
        })
    }

    /// Codec for the receiving end of HTTP requests, where no `Host` value is known.
    pub fn http_request_receiver() -> Self {
        Self {
            framing: Framing::HttpRequest,
            host: SmolStr::new("localhost"),
        }
    }

    pub fn http_response() -> Self {
        Self {
            framing: Framing::HttpResponse,
            host: SmolStr::default(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn mode(&self) -> CamouflageMode {
        self.framing.mode()
    }

    pub fn encode(&self, message: &Message, buf: &mut BytesMut) -> Result<(), Error> {
        if message.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadOversized {
                payload_size: message.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        match self.framing {
            Framing::Plain => {
                let size = u16::try_from(message.len()).map_err(|_| Error::PayloadOversized {
                    payload_size: message.len(),
                    max: MAX_PAYLOAD_SIZE,
                })?;

                buf.reserve(PlainHeader::SIZE + message.len());

                let header = PlainHeader {
                    tag: message.tag,
                    size,
                    reserved: 0,
                };
                header.encode(buf);
            }
            Framing::HttpRequest => {
                let head = http::request_head(&self.host, message);
                buf.reserve(head.len() + message.len());
                buf.put_slice(head.as_bytes());
            }
            Framing::HttpResponse => {
                let head = http::response_head(message);
                buf.reserve(head.len() + message.len());
                buf.put_slice(head.as_bytes());
            }
        }

        buf.put_slice(&message.payload);

        Ok(())
    }

    /// Decodes exactly one frame spanning the whole input.
    ///
    /// Truncated input and extra bytes past the end of the frame are both rejected.
    pub fn decode(&self, buf: Bytes) -> Result<Message, Error> {
        let name = self.framing.name();

        let layout = match self.parse_head(&buf)? {
            Some(layout) => layout,
            None if self.framing == Framing::Plain => {
                return Err(Error::NotEnoughBytes {
                    name,
                    received: buf.len(),
                    expected: PlainHeader::SIZE,
                });
            }
            None => {
                return Err(Error::IncompleteHead {
                    name,
                    received: buf.len(),
                });
            }
        };

        let frame_size = layout.frame_size();

        if buf.len() < frame_size {
            return Err(Error::NotEnoughBytes {
                name,
                received: buf.len(),
                expected: frame_size,
            });
        }

        if buf.len() > frame_size {
            return Err(Error::TrailingBytes {
                name,
                count: buf.len() - frame_size,
            });
        }

        Ok(Message {
            tag: layout.tag,
            payload: buf.slice(layout.head_size..frame_size),
        })
    }

    /// Decodes the next frame at the front of a stream buffer.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame; nothing is consumed
    /// in that case. On success, the frame is removed from the buffer.
    pub fn decode_buf(&self, buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        let Some(layout) = self.parse_head(&buf[..])? else {
            return Ok(None);
        };

        if buf.len() < layout.frame_size() {
            return Ok(None);
        }

        buf.advance(layout.head_size);
        let payload = buf.split_to(layout.body_size).freeze();

        Ok(Some(Message {
            tag: layout.tag,
            payload,
        }))
    }

    fn parse_head(&self, buf: &[u8]) -> Result<Option<Layout>, Error> {
        match self.framing {
            Framing::Plain => {
                if buf.len() < PlainHeader::SIZE {
                    return Ok(None);
                }

                let header = PlainHeader::decode(&buf[..PlainHeader::SIZE])?;

                Ok(Some(Layout {
                    tag: header.tag,
                    head_size: PlainHeader::SIZE,
                    body_size: usize::from(header.size),
                }))
            }
            Framing::HttpRequest => http::parse_request_head(buf),
            Framing::HttpResponse => http::parse_response_head(buf),
        }
    }
}

use std::io;

use bytes::BytesMut;
use hop_proto::{Codec, MAX_PAYLOAD_SIZE, Message};
use tokio_util::codec::{Decoder, Encoder};

/// Frame decoded from a leg: either a message or the protocol violation that replaced it
pub(crate) type Frame = Result<Message, hop_proto::Error>;

/// tokio-util adapter over a [`hop_proto::Codec`]
///
/// Without an inner codec, bytes pass through untouched: each read chunk becomes a data message.
/// Protocol violations are yielded as frames instead of decoder errors, so the framed reader keeps
/// going after them.
#[derive(Debug, Clone)]
pub(crate) struct LegCodec {
    inner: Option<Codec>,
}

impl LegCodec {
    pub(crate) fn framed(codec: Codec) -> Self {
        Self { inner: Some(codec) }
    }

    pub(crate) fn raw() -> Self {
        Self { inner: None }
    }

    pub(crate) fn inner(&self) -> Option<&Codec> {
        self.inner.as_ref()
    }
}

impl Decoder for LegCodec {
    type Item = Frame;

    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let Some(codec) = &self.inner else {
            let len = core::cmp::min(src.len(), MAX_PAYLOAD_SIZE);
            return Ok(Some(Ok(Message::data(src.split_to(len).freeze()))));
        };

        match codec.decode_buf(src) {
            Ok(Some(message)) => Ok(Some(Ok(message))),
            Ok(None) => Ok(None),
            Err(error) => {
                // Resynchronization is not attempted.
                src.clear();
                Ok(Some(Err(error)))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match &self.inner {
            Some(codec) if !src.is_empty() => {
                // Whatever is left can only be a truncated frame.
                let leftover = src.split().freeze();
                Ok(Some(codec.decode(leftover)))
            }
            _ => Ok(None),
        }
    }
}

impl Encoder<Message> for LegCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &self.inner {
            Some(codec) => codec.encode(&item, dst).map_err(io::Error::other),
            None => {
                dst.extend_from_slice(&item.payload);
                Ok(())
            }
        }
    }
}

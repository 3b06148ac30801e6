#![expect(clippy::unwrap_used, reason = "test code can panic on errors")]
#![allow(unused_crate_dependencies)]

use hop_proto::*;
use proptest::prelude::*;
use test_utils::{every_byte_value, message_payload, tag_value};

fn codecs() -> [Codec; 3] {
    [
        Codec::plain(),
        Codec::http_request("tunnel.example.org:8080").unwrap(),
        Codec::http_response(),
    ]
}

fn encode(codec: &Codec, message: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    codec.encode(message, &mut buf).unwrap();
    buf
}

#[test]
fn plain_encoding() {
    let encoded = encode(&Codec::plain(), &Message::data("PING"));
    assert_eq!(vec![0, 0, 4, 0, b'P', b'I', b'N', b'G'], encoded);
}

#[test]
fn http_request_encoding() {
    let codec = Codec::http_request("10.0.0.1:22").unwrap();
    let encoded = encode(&codec, &Message::data("PING"));
    assert_eq!(
        &b"POST /upload HTTP/1.1\r\n\
        Host: 10.0.0.1:22\r\n\
        Content-Type: application/octet-stream\r\n\
        Content-Length: 4\r\n\
        X-Request-Id: 0\r\n\
        Connection: keep-alive\r\n\
        \r\n\
        PING"[..],
        &encoded[..]
    );
}

#[test]
fn http_response_decoding() {
    let raw = Bytes::from_static(
        b"HTTP/1.1 200 OK\r\n\
        Content-Type: application/octet-stream\r\n\
        Content-Length: 4\r\n\
        X-Request-Id: 0\r\n\
        \r\n\
        PONG",
    );
    let message = Codec::http_response().decode(raw).unwrap();
    assert_eq!(Message::data("PONG"), message);
}

#[test]
fn every_byte_value_survives() {
    let message = Message::new(Tag::from(0xFF), every_byte_value());

    for codec in codecs() {
        let decoded = codec.decode(encode(&codec, &message).freeze()).unwrap();
        assert_eq!(message, decoded, "{:?}", codec.framing());
    }
}

#[test]
fn empty_message_survives() {
    let message = Message::data(Bytes::new());

    for codec in codecs() {
        let decoded = codec.decode(encode(&codec, &message).freeze()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.tag, Tag::DATA);
    }
}

#[test]
fn oversized_payload_is_not_encoded() {
    let message = Message::data(vec![0; MAX_PAYLOAD_SIZE + 1]);

    for codec in codecs() {
        let mut buf = BytesMut::new();
        let err = codec.encode(&message, &mut buf).err().unwrap();
        assert_eq!("payload oversized: max is 16384, got 16385", err.to_string());
        assert!(buf.is_empty());
    }
}

#[test]
fn truncated_frames_are_rejected() {
    let message = Message::data("a few payload bytes");

    for codec in codecs() {
        let encoded = encode(&codec, &message).freeze();

        for len in 0..encoded.len() {
            let res = codec.decode(encoded.slice(..len));
            assert!(res.is_err(), "{:?} accepted a frame truncated to {len} bytes", codec.framing());
        }
    }
}

#[test]
fn trailing_bytes_are_rejected() {
    let mut encoded = encode(&Codec::plain(), &Message::data("PING"));
    encoded.extend_from_slice(b"!");

    let err = Codec::plain().decode(encoded.freeze()).err().unwrap();
    assert_eq!("1 unexpected bytes after PLAIN HEADER", err.to_string());
}

#[test]
fn plain_header_too_short() {
    let err = Codec::plain().decode(Bytes::from_static(&[0, 0])).err().unwrap();
    assert_eq!(
        "not enough bytes provided to decode PLAIN HEADER: received 2 bytes, expected 4 bytes",
        err.to_string()
    );
}

#[test]
fn request_expected_but_response_received() {
    let response = encode(&Codec::http_response(), &Message::data("PONG")).freeze();
    assert!(Codec::http_request("localhost").unwrap().decode(response).is_err());
}

#[test]
fn response_expected_but_request_received() {
    let request = encode(&Codec::http_request("localhost").unwrap(), &Message::data("PING")).freeze();
    assert!(Codec::http_response().decode(request).is_err());
}

#[test]
fn non_http_bytes_are_rejected() {
    let garbage = Bytes::from_static(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03");

    for codec in [Codec::http_request("localhost").unwrap(), Codec::http_response()] {
        let err = codec.decode(garbage.clone()).err().unwrap();
        assert!(matches!(err, Error::InvalidFrame { .. }), "{err}");
    }
}

#[test]
fn unexpected_method_is_rejected() {
    let raw = Bytes::from_static(b"GET /upload HTTP/1.1\r\nContent-Length: 0\r\nX-Request-Id: 0\r\n\r\n");
    let err = Codec::http_request("localhost").unwrap().decode(raw).err().unwrap();
    assert_eq!("invalid `method` in HTTP REQUEST: unexpected method", err.to_string());
}

#[test]
fn unexpected_status_is_rejected() {
    let raw = Bytes::from_static(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nX-Request-Id: 0\r\n\r\n");
    let err = Codec::http_response().decode(raw).err().unwrap();
    assert_eq!("invalid `status` in HTTP RESPONSE: unexpected status code", err.to_string());
}

#[test]
fn missing_tag_is_rejected() {
    let raw = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let err = Codec::http_response().decode(raw).err().unwrap();
    assert_eq!("invalid `X-Request-Id` in HTTP RESPONSE: missing", err.to_string());
}

#[test]
fn bad_content_length_is_rejected() {
    let raw = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: -1\r\nX-Request-Id: 0\r\n\r\n");
    let err = Codec::http_response().decode(raw).err().unwrap();
    assert_eq!(
        "invalid `Content-Length` in HTTP RESPONSE: not a decimal number",
        err.to_string()
    );
}

#[test]
fn oversized_content_length_is_rejected() {
    let raw = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 99999999\r\nX-Request-Id: 0\r\n\r\n");
    let err = Codec::http_response().decode(raw).err().unwrap();
    assert!(matches!(err, Error::PayloadOversized { .. }));
}

#[test]
fn stream_of_frames_is_split_on_boundaries() {
    let codec = Codec::http_response();
    let messages = [
        Message::hello(),
        Message::data(Bytes::new()),
        Message::new(Tag::from(42), "forty-two"),
    ];

    let mut stream = BytesMut::new();
    for message in &messages {
        codec.encode(message, &mut stream).unwrap();
    }

    for expected in &messages {
        let decoded = codec.decode_buf(&mut stream).unwrap().unwrap();
        assert_eq!(expected, &decoded);
    }

    assert!(codec.decode_buf(&mut stream).unwrap().is_none());
}

proptest! {
    #[test]
    fn encode_decode(payload in message_payload(), tag in tag_value(), idx in 0..3usize) {
        let codec = &codecs()[idx];
        let message = Message::new(Tag::from(tag), payload.0);

        let decoded = codec.decode(encode(codec, &message).freeze()).unwrap();
        prop_assert_eq!(message, decoded);
    }

    #[test]
    fn decode_buf_byte_by_byte(payload in test_utils::small_payload(), tag in tag_value(), idx in 0..3usize) {
        let codec = &codecs()[idx];
        let message = Message::new(Tag::from(tag), payload.0);
        let encoded = encode(codec, &message);

        let mut stream = BytesMut::new();
        let mut decoded = None;

        for (idx, byte) in encoded.iter().enumerate() {
            prop_assert!(decoded.is_none(), "frame decoded before its last byte ({idx})");
            stream.extend_from_slice(&[*byte]);
            decoded = codec.decode_buf(&mut stream).unwrap();
        }

        prop_assert_eq!(Some(message), decoded);
        prop_assert!(stream.is_empty());
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in test_utils::small_payload(), idx in 0..3usize) {
        let codec = &codecs()[idx];
        let _ = codec.decode(Bytes::from(data.0.clone()));
        let _ = codec.decode_buf(&mut BytesMut::from(&data.0[..]));
    }
}

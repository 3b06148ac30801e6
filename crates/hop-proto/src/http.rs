use crate::utils::{HeaderLookup as _, parse_decimal};
use crate::{Error, Layout, MAX_HEAD_SIZE, MAX_PAYLOAD_SIZE, Message, Tag};

pub(crate) const REQUEST_NAME: &str = "HTTP REQUEST";
pub(crate) const RESPONSE_NAME: &str = "HTTP RESPONSE";

const REQUEST_METHOD: &str = "POST";
const REQUEST_PATH: &str = "/upload";
const RESPONSE_STATUS: u16 = 200;

const HEADER_HOST: &str = "Host";
const HEADER_CONTENT_TYPE: &str = "Content-Type";
const HEADER_CONTENT_LENGTH: &str = "Content-Length";
const HEADER_TAG: &str = "X-Request-Id";
const HEADER_CONNECTION: &str = "Connection";
const HEADER_CACHE_CONTROL: &str = "Cache-Control";

const CONTENT_TYPE: &str = "application/octet-stream";

const MAX_HEADERS: usize = 16;

pub(crate) fn validate_host(host: &str) -> Result<(), Error> {
    if host.is_empty() {
        return Err(Error::InvalidFrame {
            name: REQUEST_NAME,
            field: HEADER_HOST,
            reason: "empty",
        });
    }

    if host.bytes().any(|b| b.is_ascii_control() || b.is_ascii_whitespace() || !b.is_ascii()) {
        return Err(Error::InvalidFrame {
            name: REQUEST_NAME,
            field: HEADER_HOST,
            reason: "invalid character",
        });
    }

    // Leave enough room in the head for the other headers.
    if host.len() > MAX_HEAD_SIZE / 2 {
        return Err(Error::HeadOversized {
            name: REQUEST_NAME,
            max: MAX_HEAD_SIZE,
        });
    }

    Ok(())
}

pub(crate) fn request_head(host: &str, message: &Message) -> String {
    format!(
        "{REQUEST_METHOD} {REQUEST_PATH} HTTP/1.1\r\n\
        {HEADER_HOST}: {host}\r\n\
        {HEADER_CONTENT_TYPE}: {CONTENT_TYPE}\r\n\
        {HEADER_CONTENT_LENGTH}: {length}\r\n\
        {HEADER_TAG}: {tag}\r\n\
        {HEADER_CONNECTION}: keep-alive\r\n\
        \r\n",
        length = message.len(),
        tag = u8::from(message.tag),
    )
}

pub(crate) fn response_head(message: &Message) -> String {
    format!(
        "HTTP/1.1 {RESPONSE_STATUS} OK\r\n\
        {HEADER_CONTENT_TYPE}: {CONTENT_TYPE}\r\n\
        {HEADER_CONTENT_LENGTH}: {length}\r\n\
        {HEADER_TAG}: {tag}\r\n\
        {HEADER_CACHE_CONTROL}: no-cache\r\n\
        {HEADER_CONNECTION}: keep-alive\r\n\
        \r\n",
        length = message.len(),
        tag = u8::from(message.tag),
    )
}

pub(crate) fn parse_request_head(buf: &[u8]) -> Result<Option<Layout>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let status = req.parse(buf).map_err(|e| malformed(REQUEST_NAME, e))?;

    let head_size = match check_head_size(REQUEST_NAME, status, buf.len())? {
        Some(head_size) => head_size,
        None => return Ok(None),
    };

    if req.method != Some(REQUEST_METHOD) {
        return Err(Error::InvalidFrame {
            name: REQUEST_NAME,
            field: "method",
            reason: "unexpected method",
        });
    }

    if req.version != Some(1) {
        return Err(Error::InvalidFrame {
            name: REQUEST_NAME,
            field: "version",
            reason: "HTTP/1.1 expected",
        });
    }

    let content_length = req.unique_header_value(HEADER_CONTENT_LENGTH);
    let tag = req.unique_header_value(HEADER_TAG);

    entity_layout(REQUEST_NAME, head_size, content_length, tag).map(Some)
}

pub(crate) fn parse_response_head(buf: &[u8]) -> Result<Option<Layout>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut rsp = httparse::Response::new(&mut headers);

    let status = rsp.parse(buf).map_err(|e| malformed(RESPONSE_NAME, e))?;

    let head_size = match check_head_size(RESPONSE_NAME, status, buf.len())? {
        Some(head_size) => head_size,
        None => return Ok(None),
    };

    if rsp.code != Some(RESPONSE_STATUS) {
        return Err(Error::InvalidFrame {
            name: RESPONSE_NAME,
            field: "status",
            reason: "unexpected status code",
        });
    }

    if rsp.version != Some(1) {
        return Err(Error::InvalidFrame {
            name: RESPONSE_NAME,
            field: "version",
            reason: "HTTP/1.1 expected",
        });
    }

    let content_length = rsp.unique_header_value(HEADER_CONTENT_LENGTH);
    let tag = rsp.unique_header_value(HEADER_TAG);

    entity_layout(RESPONSE_NAME, head_size, content_length, tag).map(Some)
}

fn malformed(name: &'static str, error: httparse::Error) -> Error {
    let reason = match error {
        httparse::Error::TooManyHeaders => "too many headers",
        httparse::Error::Version => "bad version",
        httparse::Error::Status => "bad status",
        httparse::Error::HeaderName | httparse::Error::HeaderValue => "bad header",
        httparse::Error::NewLine => "bad line ending",
        _ => "malformed",
    };

    Error::InvalidFrame {
        name,
        field: "head",
        reason,
    }
}

fn check_head_size(name: &'static str, status: httparse::Status<usize>, received: usize) -> Result<Option<usize>, Error> {
    match status {
        httparse::Status::Complete(head_size) if head_size > MAX_HEAD_SIZE => Err(Error::HeadOversized {
            name,
            max: MAX_HEAD_SIZE,
        }),
        httparse::Status::Complete(head_size) => Ok(Some(head_size)),
        httparse::Status::Partial if received >= MAX_HEAD_SIZE => Err(Error::HeadOversized {
            name,
            max: MAX_HEAD_SIZE,
        }),
        httparse::Status::Partial => Ok(None),
    }
}

fn entity_layout(
    name: &'static str,
    head_size: usize,
    content_length: Result<Option<&str>, ()>,
    tag: Result<Option<&str>, ()>,
) -> Result<Layout, Error> {
    let body_size = match content_length {
        Ok(Some(value)) => parse_decimal::<usize>(value).ok_or(Error::InvalidFrame {
            name,
            field: HEADER_CONTENT_LENGTH,
            reason: "not a decimal number",
        })?,
        Ok(None) => {
            return Err(Error::InvalidFrame {
                name,
                field: HEADER_CONTENT_LENGTH,
                reason: "missing",
            });
        }
        Err(()) => {
            return Err(Error::InvalidFrame {
                name,
                field: HEADER_CONTENT_LENGTH,
                reason: "duplicated or not UTF-8",
            });
        }
    };

    if body_size > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadOversized {
            payload_size: body_size,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let tag = match tag {
        Ok(Some(value)) => parse_decimal::<u8>(value).map(Tag::from).ok_or(Error::InvalidFrame {
            name,
            field: HEADER_TAG,
            reason: "not a tag value",
        })?,
        Ok(None) => {
            return Err(Error::InvalidFrame {
                name,
                field: HEADER_TAG,
                reason: "missing",
            });
        }
        Err(()) => {
            return Err(Error::InvalidFrame {
                name,
                field: HEADER_TAG,
                reason: "duplicated or not UTF-8",
            });
        }
    };

    Ok(Layout {
        tag,
        head_size,
        body_size,
    })
}

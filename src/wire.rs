//! Wire record format exchanged with the store.
//!
//! A record is one header line followed by the raw body:
//!
//! ```text
//! <channel>@<id>\n<body>
//! ```
//!
//! The header is split once on the first `@`, the record once on the first
//! newline. The body is opaque and handed to the payload codec untouched.

use crate::error::ParseError;
use crate::types::MessageId;

/// A parsed record whose body has not been decoded yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub channel: String,
    pub id: MessageId,
    pub body: Vec<u8>,
}

/// Parse a wire record.
///
/// A record without a newline has an empty body. A header without `@`, or
/// whose id is not a plain non-negative integer, is rejected.
pub fn parse(raw: &[u8]) -> Result<RawMessage, ParseError> {
    let (header, body) = match raw.iter().position(|&b| b == b'\n') {
        Some(pos) => (&raw[..pos], &raw[pos + 1..]),
        None => (raw, &[][..]),
    };

    let header = std::str::from_utf8(header).map_err(|_| ParseError::NonUtf8Header)?;

    let (channel, id) = header
        .split_once('@')
        .ok_or_else(|| ParseError::MissingSeparator(header.to_string()))?;

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidId {
            header: header.to_string(),
            id: id.to_string(),
        });
    }
    let id = id.parse::<u64>().map_err(|_| ParseError::InvalidId {
        header: header.to_string(),
        id: id.to_string(),
    })?;

    Ok(RawMessage {
        channel: channel.to_string(),
        id: MessageId(id),
        body: body.to_vec(),
    })
}

/// Serialize a record in wire format.
pub fn serialize(channel: &str, id: MessageId, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(channel.len() + 22 + body.len());
    out.extend_from_slice(channel.as_bytes());
    out.push(b'@');
    out.extend_from_slice(id.0.to_string().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body);
    out
}

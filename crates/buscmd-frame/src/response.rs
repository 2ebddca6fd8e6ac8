use bytes::Bytes;

use crate::codec::{CommandText, RESPONSE_HEADER_SIZE, TEXT_FIELD_SIZE};
use crate::codes::ResponseCode;

/// Wire size of the query-ID response: header + device ID.
pub const QUERY_ID_RESPONSE_SIZE: usize = RESPONSE_HEADER_SIZE + 1;
/// Wire size of the echo response: header + echo data.
pub const ECHO_RESPONSE_SIZE: usize = RESPONSE_HEADER_SIZE + TEXT_FIELD_SIZE;

/// A response frame: `[length][response code][response ID][payload..]`.
///
/// `response_id` is assigned by the responder and only means something for
/// deferred responses; it is `0` otherwise. The payload layout depends on
/// the command being answered, so typed constructors and accessors exist for
/// the shared response shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Response {
    pub code: ResponseCode,
    pub response_id: u8,
    pub payload: Bytes,
}

impl Response {
    /// A header-only response.
    pub fn status(code: ResponseCode) -> Self {
        Self::with_payload(code, Bytes::new())
    }

    /// A response with trailing payload bytes.
    pub fn with_payload(code: ResponseCode, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            response_id: 0,
            payload: payload.into(),
        }
    }

    /// `OK` carrying `payload`.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self::with_payload(ResponseCode::Ok, payload)
    }

    /// `DEFERRED` under `response_id`.
    pub fn deferred(response_id: u8) -> Self {
        Self::status(ResponseCode::Deferred).with_response_id(response_id)
    }

    /// `NOT_READY`.
    pub fn not_ready() -> Self {
        Self::status(ResponseCode::NotReady)
    }

    /// `BUSY`.
    pub fn busy() -> Self {
        Self::status(ResponseCode::Busy)
    }

    /// `ERROR`.
    pub fn error() -> Self {
        Self::status(ResponseCode::Error)
    }

    /// `UNKNOWN`.
    pub fn unknown() -> Self {
        Self::status(ResponseCode::Unknown)
    }

    /// Answer to `CMD_QUERY_ID`.
    pub fn query_id(device_id: u8) -> Self {
        Self::ok(vec![device_id])
    }

    /// Answer to `CMD_ECHO`.
    pub fn echo(data: &CommandText) -> Self {
        Self::ok(data.as_wire().to_vec())
    }

    /// Replace the response ID.
    pub fn with_response_id(mut self, response_id: u8) -> Self {
        self.response_id = response_id;
        self
    }

    /// The true size of this record on the wire; this is what `length` holds.
    pub fn wire_size(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload.len()
    }

    /// Device ID, if this is an `OK` query-ID response.
    pub fn device_id(&self) -> Option<u8> {
        match (self.code, self.payload.as_ref()) {
            (ResponseCode::Ok, [id]) => Some(*id),
            _ => None,
        }
    }

    /// Echoed text, if this is an `OK` echo response.
    pub fn echo_text(&self) -> Option<CommandText> {
        if self.code != ResponseCode::Ok {
            return None;
        }
        let raw: &[u8; TEXT_FIELD_SIZE] = self.payload.as_ref().try_into().ok()?;
        Some(CommandText::from_wire(raw))
    }
}

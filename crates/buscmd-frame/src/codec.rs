use bytes::{BufMut, Bytes, BytesMut};

use crate::codes::{
    is_builtin, ResponseCode, CMD_ECHO, CMD_EXECUTE, CMD_MASTER_ADDR, CMD_NONE, CMD_QUERY_ID,
    CMD_QUERY_RESPONSE, CMD_RESET, NOTIFY_CMD_INVALID,
};
use crate::command::{
    Command, ECHO_SIZE, EXECUTE_SIZE, INVALID_NOTIFY_SIZE, MASTER_ADDR_SIZE, QUERY_RESPONSE_SIZE,
};
use crate::error::{FrameError, Result};
use crate::response::Response;
use crate::text::FixedText;

/// Capacity of the receive and response buffers: no frame is larger.
pub const MAX_FRAME_SIZE: usize = 32;

/// Command header: length (1) + command code (1).
pub const COMMAND_HEADER_SIZE: usize = 2;

/// Response header: length (1) + response code (1) + response ID (1).
pub const RESPONSE_HEADER_SIZE: usize = 3;

/// Size of the command-line and echo text fields.
pub const TEXT_FIELD_SIZE: usize = 27;

/// The text field carried by `Execute` and `Echo`.
pub type CommandText = FixedText<TEXT_FIELD_SIZE>;

/// A frame copied into fixed storage.
///
/// This is what the listener's buffers hold. Building one never allocates,
/// so it is safe on the time-critical paths.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    buf: [u8; MAX_FRAME_SIZE],
    len: u8,
}

impl RawFrame {
    /// A zero-length frame.
    pub const fn empty() -> Self {
        Self {
            buf: [0u8; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// A header-only response frame, built without encoding machinery.
    pub const fn status(code: ResponseCode, response_id: u8) -> Self {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        buf[0] = RESPONSE_HEADER_SIZE as u8;
        buf[1] = code as u8;
        buf[2] = response_id;
        Self {
            buf,
            len: RESPONSE_HEADER_SIZE as u8,
        }
    }

    /// Copy `bytes` verbatim.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut frame = Self::empty();
        frame.buf[..bytes.len()].copy_from_slice(bytes);
        frame.len = bytes.len() as u8;
        Ok(frame)
    }

    /// Capture one frame from received bytes, trusting only a bounded
    /// declared length.
    ///
    /// The declared length (first byte) is checked against `header_size`,
    /// [`MAX_FRAME_SIZE`] and the bytes actually received before anything is
    /// copied. Bytes past the declared length are ignored.
    pub fn capture(raw: &[u8], header_size: usize) -> Result<Self> {
        let declared = declared_length(raw, header_size)?;
        Self::from_slice(&raw[..declared])
    }

    /// The frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True if no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The code byte (command or response code), if present.
    pub fn code(&self) -> Option<u8> {
        self.as_bytes().get(1).copied()
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawFrame({})", to_hex(self.as_bytes()))
    }
}

/// Validate the self-describing length prefix of `raw`.
///
/// Returns the declared length once it is known to be at least
/// `header_size`, at most [`MAX_FRAME_SIZE`] and backed by received bytes.
pub fn declared_length(raw: &[u8], header_size: usize) -> Result<usize> {
    if raw.len() < header_size {
        return Err(FrameError::Truncated {
            len: raw.len(),
            min: header_size,
        });
    }
    let declared = raw[0] as usize;
    if declared < header_size {
        return Err(FrameError::LengthTooShort {
            declared,
            min: header_size,
        });
    }
    if declared > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: declared,
            max: MAX_FRAME_SIZE,
        });
    }
    if declared > raw.len() {
        return Err(FrameError::LengthExceedsData {
            declared,
            available: raw.len(),
        });
    }
    Ok(declared)
}

/// Encode a command into the wire format.
///
/// ```text
/// ┌────────────┬──────────────┬──────────────────────────┐
/// │ Length (1) │ Command (1)  │ Variant fields            │
/// │ = total    │              │ (Length - 2 bytes)        │
/// └────────────┴──────────────┴──────────────────────────┘
/// ```
pub fn encode_command(command: &Command, dst: &mut BytesMut) -> Result<()> {
    if let Command::Device { code, .. } = command {
        if is_builtin(*code) {
            return Err(FrameError::SharedCode(*code));
        }
    }
    let size = command.wire_size();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    dst.reserve(size);
    dst.put_u8(size as u8);
    dst.put_u8(command.code());
    match command {
        Command::None | Command::QueryId | Command::Reset => {}
        Command::QueryResponse {
            response_id,
            original_command,
        } => {
            dst.put_u8(*response_id);
            dst.put_u8(*original_command);
        }
        Command::MasterAddress { address } => dst.put_u8(*address),
        Command::Execute {
            requester_address,
            command_line,
        } => {
            dst.put_u8(*requester_address);
            dst.put_slice(command_line.as_wire());
        }
        Command::Echo { data } => dst.put_slice(data.as_wire()),
        Command::InvalidCommand { code } => dst.put_u8(*code),
        Command::Device { payload, .. } => dst.put_slice(payload),
    }
    Ok(())
}

/// Decode a command from received bytes.
///
/// Reads exactly the declared length and never past it. Fixed-size commands
/// must declare their exact record size.
pub fn decode_command(src: &[u8]) -> Result<Command> {
    let declared = declared_length(src, COMMAND_HEADER_SIZE)?;
    let frame = &src[..declared];
    let code = frame[1];
    let body = &frame[COMMAND_HEADER_SIZE..];

    let expect = |expected: usize| {
        if declared == expected {
            Ok(())
        } else {
            Err(FrameError::WrongLength {
                code,
                expected,
                actual: declared,
            })
        }
    };

    let command = match code {
        CMD_NONE => {
            expect(COMMAND_HEADER_SIZE)?;
            Command::None
        }
        CMD_QUERY_ID => {
            expect(COMMAND_HEADER_SIZE)?;
            Command::QueryId
        }
        CMD_RESET => {
            expect(COMMAND_HEADER_SIZE)?;
            Command::Reset
        }
        CMD_QUERY_RESPONSE => {
            expect(QUERY_RESPONSE_SIZE)?;
            Command::QueryResponse {
                response_id: body[0],
                original_command: body[1],
            }
        }
        CMD_MASTER_ADDR => {
            expect(MASTER_ADDR_SIZE)?;
            Command::MasterAddress { address: body[0] }
        }
        CMD_EXECUTE => {
            expect(EXECUTE_SIZE)?;
            Command::Execute {
                requester_address: body[0],
                command_line: text_field(&body[1..])?,
            }
        }
        CMD_ECHO => {
            expect(ECHO_SIZE)?;
            Command::Echo {
                data: text_field(body)?,
            }
        }
        NOTIFY_CMD_INVALID => {
            expect(INVALID_NOTIFY_SIZE)?;
            Command::InvalidCommand { code: body[0] }
        }
        code => Command::Device {
            code,
            payload: Bytes::copy_from_slice(body),
        },
    };
    Ok(command)
}

fn text_field(raw: &[u8]) -> Result<CommandText> {
    let field: &[u8; TEXT_FIELD_SIZE] =
        raw.try_into().map_err(|_| FrameError::Truncated {
            len: raw.len(),
            min: TEXT_FIELD_SIZE,
        })?;
    Ok(CommandText::from_wire(field))
}

/// Encode a response into the wire format.
///
/// ```text
/// ┌────────────┬──────────────┬─────────────────┬────────────────┐
/// │ Length (1) │ Response (1) │ Response ID (1) │ Payload        │
/// └────────────┴──────────────┴─────────────────┴────────────────┘
/// ```
pub fn encode_response(response: &Response, dst: &mut BytesMut) -> Result<()> {
    let size = response.wire_size();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    dst.reserve(size);
    dst.put_u8(size as u8);
    dst.put_u8(response.code.into());
    dst.put_u8(response.response_id);
    dst.put_slice(&response.payload);
    Ok(())
}

/// Decode a response from received bytes.
pub fn decode_response(src: &[u8]) -> Result<Response> {
    let declared = declared_length(src, RESPONSE_HEADER_SIZE)?;
    let frame = &src[..declared];
    let code = ResponseCode::from_u8(frame[1]).ok_or(FrameError::UnknownResponseCode(frame[1]))?;
    Ok(Response {
        code,
        response_id: frame[2],
        payload: Bytes::copy_from_slice(&frame[RESPONSE_HEADER_SIZE..]),
    })
}

/// Encode a command straight into fixed storage.
pub fn command_frame(command: &Command) -> Result<RawFrame> {
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);
    encode_command(command, &mut buf)?;
    RawFrame::from_slice(&buf)
}

/// Encode a response straight into fixed storage.
pub fn response_frame(response: &Response) -> Result<RawFrame> {
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);
    encode_response(response, &mut buf)?;
    RawFrame::from_slice(&buf)
}

/// Lowercase hex with no separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse hex, ignoring whitespace, `:` and an optional `0x` prefix.
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(command: &Command) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_command(command, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn length_prefix_is_record_size() {
        for command in [
            Command::None,
            Command::QueryId,
            Command::query_response(3, CMD_EXECUTE),
            Command::Reset,
            Command::MasterAddress { address: 0x08 },
            Command::execute(0x08, "status"),
            Command::echo("ping"),
            Command::InvalidCommand { code: 0x33 },
        ] {
            let wire = encoded(&command);
            assert_eq!(wire[0] as usize, command.wire_size());
            assert_eq!(wire.len(), command.wire_size());
            assert_eq!(decode_command(&wire).unwrap(), command);
        }
    }

    #[test]
    fn query_id_wire_bytes() {
        assert_eq!(encoded(&Command::QueryId), vec![0x02, 0x01]);
        assert_eq!(
            encoded(&Command::query_response(3, CMD_EXECUTE)),
            vec![0x04, 0x02, 0x03, 0x05]
        );
    }

    #[test]
    fn execute_layout_is_flat() {
        let wire = encoded(&Command::execute(0x09, "go"));
        assert_eq!(wire.len(), 30);
        assert_eq!(&wire[..5], &[30, CMD_EXECUTE, 0x09, b'g', b'o']);
        assert!(wire[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn decode_ignores_bytes_past_declared_length() {
        let mut wire = encoded(&Command::QueryId);
        wire.extend_from_slice(&[0xAA; 10]);
        assert_eq!(decode_command(&wire).unwrap(), Command::QueryId);
    }

    #[test]
    fn decode_rejects_length_beyond_capacity() {
        let mut wire = vec![0u8; 64];
        wire[0] = 64;
        wire[1] = 0x40;
        assert!(matches!(
            decode_command(&wire),
            Err(FrameError::FrameTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn decode_rejects_length_beyond_received_bytes() {
        let wire = [10u8, 0x40, 1, 2];
        assert!(matches!(
            decode_command(&wire),
            Err(FrameError::LengthExceedsData {
                declared: 10,
                available: 4
            })
        ));
    }

    #[test]
    fn decode_rejects_short_and_truncated_frames() {
        assert!(matches!(
            decode_command(&[1]),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            decode_command(&[1, 1]),
            Err(FrameError::LengthTooShort { .. })
        ));
    }

    #[test]
    fn fixed_size_command_with_wrong_length_is_rejected() {
        let wire = [3u8, CMD_QUERY_RESPONSE, 1];
        assert!(matches!(
            decode_command(&wire),
            Err(FrameError::WrongLength {
                code: CMD_QUERY_RESPONSE,
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn device_command_keeps_payload() {
        let command = Command::Device {
            code: 0x42,
            payload: Bytes::from_static(b"abc"),
        };
        let wire = encoded(&command);
        assert_eq!(wire, vec![5, 0x42, b'a', b'b', b'c']);
        assert_eq!(decode_command(&wire).unwrap(), command);
    }

    #[test]
    fn device_command_with_shared_code_fails_to_encode() {
        let command = Command::Device {
            code: CMD_QUERY_ID,
            payload: Bytes::from_static(&[1]),
        };
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_command(&command, &mut buf),
            Err(FrameError::SharedCode(CMD_QUERY_ID))
        );
        assert!(buf.is_empty());
        assert!(command_frame(&command).is_err());
    }

    #[test]
    fn oversized_device_command_fails_to_encode() {
        let command = Command::Device {
            code: 0x42,
            payload: Bytes::from(vec![0u8; 31]),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_command(&command, &mut buf),
            Err(FrameError::FrameTooLarge { size: 33, .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn query_id_response_wire_bytes() {
        let mut buf = BytesMut::new();
        encode_response(&Response::query_id(7), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[4, 0x00, 0x00, 7]);

        let decoded = decode_response(&buf).unwrap();
        assert_eq!(decoded.code, ResponseCode::Ok);
        assert_eq!(decoded.response_id, 0);
        assert_eq!(decoded.device_id(), Some(7));
    }

    #[test]
    fn decode_response_rejects_unknown_code() {
        assert!(matches!(
            decode_response(&[3, 0x09, 0]),
            Err(FrameError::UnknownResponseCode(0x09))
        ));
    }

    #[test]
    fn status_frame_matches_encoder() {
        let raw = RawFrame::status(ResponseCode::Busy, 0);
        let encoded = response_frame(&Response::busy()).unwrap();
        assert_eq!(raw, encoded);
        assert_eq!(raw.as_bytes(), &[3, 0x03, 0]);
        assert_eq!(raw.code(), Some(0x03));
    }

    #[test]
    fn capture_copies_only_declared_bytes() {
        let raw = [2u8, CMD_QUERY_ID, 0xFF, 0xFF];
        let frame = RawFrame::capture(&raw, COMMAND_HEADER_SIZE).unwrap();
        assert_eq!(frame.as_bytes(), &[2, CMD_QUERY_ID]);
        assert!(RawFrame::capture(&[40, 1], COMMAND_HEADER_SIZE).is_err());
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(to_hex(&[0x04, 0x00, 0xAB]), "0400ab");
        assert_eq!(from_hex("0x04 00:ab"), Some(vec![0x04, 0x00, 0xAB]));
        assert_eq!(from_hex("abc"), None);
        assert_eq!(from_hex("zz"), None);
    }
}

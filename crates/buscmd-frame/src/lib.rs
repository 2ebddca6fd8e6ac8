//! Wire-exact command and response frames for a multi-drop bus.
//!
//! Every frame is a flat record prefixed by its own total length:
//! - commands: `[length][command code][fields..]`
//! - responses: `[length][response code][response ID][payload..]`
//!
//! All fields are single bytes, so sender and receiver never disagree on
//! byte order. No frame exceeds [`MAX_FRAME_SIZE`] bytes.

pub mod codec;
pub mod codes;
pub mod command;
pub mod error;
pub mod response;
pub mod text;

pub use codec::{
    command_frame, declared_length, decode_command, decode_response, encode_command,
    encode_response, from_hex, response_frame, to_hex, CommandText, RawFrame,
    COMMAND_HEADER_SIZE, MAX_FRAME_SIZE, RESPONSE_HEADER_SIZE, TEXT_FIELD_SIZE,
};
pub use codes::{
    command_name, expects_response, is_builtin, ResponseCode, CMD_ECHO, CMD_EXECUTE,
    CMD_MASTER_ADDR, CMD_NONE, CMD_QUERY_ID, CMD_QUERY_RESPONSE, CMD_RESET, NOTIFY_CMD_INVALID,
};
pub use command::Command;
pub use error::{FrameError, Result};
pub use response::Response;
pub use text::FixedText;

use bytes::Bytes;

use crate::codec::{CommandText, COMMAND_HEADER_SIZE};
use crate::codes::{
    command_name, CMD_ECHO, CMD_EXECUTE, CMD_MASTER_ADDR, CMD_NONE, CMD_QUERY_ID,
    CMD_QUERY_RESPONSE, CMD_RESET, NOTIFY_CMD_INVALID,
};

/// Wire size of `QueryResponse`: header + response ID + original command.
pub const QUERY_RESPONSE_SIZE: usize = COMMAND_HEADER_SIZE + 2;
/// Wire size of `MasterAddress`: header + address.
pub const MASTER_ADDR_SIZE: usize = COMMAND_HEADER_SIZE + 1;
/// Wire size of `Execute`: header + requester address + command line.
pub const EXECUTE_SIZE: usize = COMMAND_HEADER_SIZE + 1 + CommandText::CAPACITY + 1;
/// Wire size of `Echo`: header + echo data.
pub const ECHO_SIZE: usize = COMMAND_HEADER_SIZE + CommandText::CAPACITY + 1;
/// Wire size of the invalid-command notification: header + offending code.
pub const INVALID_NOTIFY_SIZE: usize = COMMAND_HEADER_SIZE + 1;

/// A command frame.
///
/// Every variant is a flat record. The wire form is always
/// `[length][command code][variant fields..]` where `length` is the size of
/// the whole record, computed from the variant when encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// `CMD_NONE`.
    None,
    /// `CMD_QUERY_ID`: ask for the device identifier.
    QueryId,
    /// `CMD_QUERY_RESPONSE`: re-poll for a deferred response.
    ///
    /// The requester remembers `response_id` and the original command code
    /// from the earlier `DEFERRED` answer.
    QueryResponse {
        response_id: u8,
        original_command: u8,
    },
    /// `CMD_RESET`.
    Reset,
    /// `CMD_MASTER_ADDR`: the master's own bus address.
    MasterAddress { address: u8 },
    /// `CMD_EXECUTE`: a command line to run on behalf of `requester_address`.
    Execute {
        requester_address: u8,
        command_line: CommandText,
    },
    /// `CMD_ECHO`: data the device should send back.
    Echo { data: CommandText },
    /// `NOTIFY_CMD_INVALID`: the receiver could not accept command `code`.
    InvalidCommand { code: u8 },
    /// Any device-specific command. `code` must be outside the shared set;
    /// encoding rejects shared codes.
    Device { code: u8, payload: Bytes },
}

impl Command {
    /// Build an `Execute` command, truncating the line to the field capacity.
    pub fn execute(requester_address: u8, command_line: &str) -> Self {
        Command::Execute {
            requester_address,
            command_line: CommandText::from(command_line),
        }
    }

    /// Build an `Echo` command, truncating the data to the field capacity.
    pub fn echo(data: &str) -> Self {
        Command::Echo {
            data: CommandText::from(data),
        }
    }

    /// Build a `QueryResponse` command.
    pub fn query_response(response_id: u8, original_command: u8) -> Self {
        Command::QueryResponse {
            response_id,
            original_command,
        }
    }

    /// The command code byte.
    pub fn code(&self) -> u8 {
        match self {
            Command::None => CMD_NONE,
            Command::QueryId => CMD_QUERY_ID,
            Command::QueryResponse { .. } => CMD_QUERY_RESPONSE,
            Command::Reset => CMD_RESET,
            Command::MasterAddress { .. } => CMD_MASTER_ADDR,
            Command::Execute { .. } => CMD_EXECUTE,
            Command::Echo { .. } => CMD_ECHO,
            Command::InvalidCommand { .. } => NOTIFY_CMD_INVALID,
            Command::Device { code, .. } => *code,
        }
    }

    /// Human-readable name of the command code.
    pub fn name(&self) -> &'static str {
        command_name(self.code())
    }

    /// The true size of this record on the wire; this is what `length` holds.
    pub fn wire_size(&self) -> usize {
        match self {
            Command::None | Command::QueryId | Command::Reset => COMMAND_HEADER_SIZE,
            Command::QueryResponse { .. } => QUERY_RESPONSE_SIZE,
            Command::MasterAddress { .. } => MASTER_ADDR_SIZE,
            Command::Execute { .. } => EXECUTE_SIZE,
            Command::Echo { .. } => ECHO_SIZE,
            Command::InvalidCommand { .. } => INVALID_NOTIFY_SIZE,
            Command::Device { payload, .. } => COMMAND_HEADER_SIZE + payload.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes_match_record_layout() {
        assert_eq!(Command::QueryId.wire_size(), 2);
        assert_eq!(Command::query_response(3, CMD_EXECUTE).wire_size(), 4);
        assert_eq!(Command::MasterAddress { address: 1 }.wire_size(), 3);
        assert_eq!(Command::execute(0x08, "ls").wire_size(), 30);
        assert_eq!(Command::echo("hi").wire_size(), 29);
        assert_eq!(
            Command::Device {
                code: 0x40,
                payload: Bytes::from_static(&[1, 2, 3]),
            }
            .wire_size(),
            5
        );
    }

    #[test]
    fn long_command_line_is_truncated() {
        let line = "x".repeat(64);
        let Command::Execute { command_line, .. } = Command::execute(1, &line) else {
            panic!("expected execute");
        };
        assert_eq!(command_line.len(), 26);
    }

    #[test]
    fn codes_and_names() {
        assert_eq!(Command::Reset.code(), CMD_RESET);
        assert_eq!(Command::echo("a").name(), "ECHO");
        assert_eq!(Command::InvalidCommand { code: 9 }.code(), 0xFE);
    }
}

use std::collections::BTreeMap;

use buscmd_frame::{
    declared_length, decode_command, decode_response, from_hex, to_hex, Command, Response,
    COMMAND_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_records, printable, FrameRecord, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = from_hex(&args.hex)
        .ok_or_else(|| CliError::new(USAGE, format!("not valid hex: {:?}", args.hex)))?;

    let record = if args.response {
        let response = decode_response(&bytes).map_err(|err| frame_error("decode failed", err))?;
        let length = declared_length(&bytes, RESPONSE_HEADER_SIZE)
            .map_err(|err| frame_error("decode failed", err))?;
        response_record(&response, &bytes[..length])
    } else {
        let command = decode_command(&bytes).map_err(|err| frame_error("decode failed", err))?;
        let length = declared_length(&bytes, COMMAND_HEADER_SIZE)
            .map_err(|err| frame_error("decode failed", err))?;
        command_record(&command, &bytes[..length])
    };

    print_records(&[record], format);
    Ok(SUCCESS)
}

/// Describe a command frame. `wire` holds exactly the frame bytes.
pub fn command_record(command: &Command, wire: &[u8]) -> FrameRecord {
    let mut fields = BTreeMap::new();
    match command {
        Command::None | Command::QueryId | Command::Reset => {}
        Command::QueryResponse {
            response_id,
            original_command,
        } => {
            fields.insert("response_id", response_id.to_string());
            fields.insert("original_command", format!("0x{original_command:02X}"));
        }
        Command::MasterAddress { address } => {
            fields.insert("address", format!("0x{address:02X}"));
        }
        Command::Execute {
            requester_address,
            command_line,
        } => {
            fields.insert("requester", format!("0x{requester_address:02X}"));
            fields.insert("command_line", format!("{:?}", command_line.to_string_lossy()));
        }
        Command::Echo { data } => {
            fields.insert("data", format!("{:?}", data.to_string_lossy()));
        }
        Command::InvalidCommand { code } => {
            fields.insert("invalid_code", format!("0x{code:02X}"));
        }
        Command::Device { payload, .. } => {
            fields.insert("payload", to_hex(payload));
        }
    }
    FrameRecord {
        kind: "command",
        code: command.code(),
        name: command.name(),
        length: wire.len(),
        fields,
        hex: to_hex(wire),
    }
}

/// Describe a response frame. `wire` holds exactly the frame bytes.
pub fn response_record(response: &Response, wire: &[u8]) -> FrameRecord {
    let mut fields = BTreeMap::new();
    fields.insert("response_id", response.response_id.to_string());
    if !response.payload.is_empty() {
        fields.insert("payload", to_hex(&response.payload));
        if let Some(text) = printable(&response.payload) {
            fields.insert("text", format!("{text:?}"));
        }
    }
    FrameRecord {
        kind: "response",
        code: response.code.into(),
        name: response.code.name(),
        length: wire.len(),
        fields,
        hex: to_hex(wire),
    }
}

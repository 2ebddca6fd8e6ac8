use buscmd_frame::{command_frame, from_hex, is_builtin, Command};

use crate::cmd::decode::command_record;
use crate::cmd::{EncodeArgs, EncodeCommand};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_records, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let command = build(&args.command)?;
    let frame = command_frame(&command).map_err(|err| frame_error("encode failed", err))?;
    print_records(&[command_record(&command, frame.as_bytes())], format);
    Ok(SUCCESS)
}

fn build(command: &EncodeCommand) -> CliResult<Command> {
    let command = match command {
        EncodeCommand::Empty => Command::None,
        EncodeCommand::QueryId => Command::QueryId,
        EncodeCommand::QueryResponse { id, original } => Command::query_response(*id, *original),
        EncodeCommand::Reset => Command::Reset,
        EncodeCommand::MasterAddress { address } => Command::MasterAddress { address: *address },
        EncodeCommand::Execute { requester, line } => Command::execute(*requester, line),
        EncodeCommand::Echo { text } => Command::echo(text),
        EncodeCommand::Invalid { code } => Command::InvalidCommand { code: *code },
        EncodeCommand::Device { code, payload } => {
            if is_builtin(*code) {
                return Err(CliError::new(
                    USAGE,
                    format!("0x{code:02X} is a shared command code, use its own subcommand"),
                ));
            }
            let payload = from_hex(payload).ok_or_else(|| {
                CliError::new(USAGE, format!("payload is not valid hex: {payload:?}"))
            })?;
            Command::Device {
                code: *code,
                payload: payload.into(),
            }
        }
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_execute_with_truncated_line() {
        let long = "x".repeat(40);
        let command = build(&EncodeCommand::Execute {
            requester: 1,
            line: long,
        })
        .unwrap();
        let frame = command_frame(&command).unwrap();
        assert_eq!(frame.len(), 30);
        assert_eq!(frame.as_bytes()[29], 0);
    }

    #[test]
    fn device_command_rejects_shared_codes() {
        let err = build(&EncodeCommand::Device {
            code: 0x05,
            payload: String::new(),
        })
        .unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn device_command_carries_payload() {
        let command = build(&EncodeCommand::Device {
            code: 0x42,
            payload: "0102".to_string(),
        })
        .unwrap();
        let frame = command_frame(&command).unwrap();
        assert_eq!(frame.as_bytes(), &[4, 0x42, 1, 2]);
    }
}

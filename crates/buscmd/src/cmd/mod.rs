use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod serve;
pub mod simulate;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve demo devices on a bus socket.
    Serve(ServeArgs),
    /// Send one command to a device on a bus socket.
    Send(SendArgs),
    /// Run a scripted session against in-process devices.
    Simulate(SimulateArgs),
    /// Decode a hex frame.
    Decode(DecodeArgs),
    /// Encode a command frame as hex.
    Encode(EncodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Device to attach, as ADDRESS=ID (e.g. 0x20=7). Repeatable.
    #[arg(long = "device", value_name = "ADDRESS=ID", value_parser = parse_device, required = true)]
    pub devices: Vec<(u8, u8)>,
    /// Listener config file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Time a demo execute takes to finish (e.g. 500ms, 2s). Zero answers at once.
    #[arg(long, default_value = "500ms")]
    pub execute_delay: String,
    /// Interval between poll ticks (e.g. 1ms).
    #[arg(long, default_value = "1ms")]
    pub poll_interval: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Device address.
    #[arg(long, short = 'a', value_parser = parse_u8)]
    pub address: u8,
    /// This master's own address, sent with execute and announce.
    #[arg(long, default_value = "0x01", value_parser = parse_u8)]
    pub master: u8,
    /// How long to re-read an empty response slot (e.g. 100ms).
    #[arg(long, default_value = "100ms")]
    pub timeout: String,
    /// Re-query a deferred reply until it is ready.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a deferred reply when --wait is set.
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    #[command(subcommand)]
    pub action: SendAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SendAction {
    /// Ask for the device identifier.
    QueryId,
    /// Have the device echo TEXT.
    Echo { text: String },
    /// Run a command line on the device.
    Execute { line: String },
    /// Reset the device.
    Reset,
    /// Tell the device this master's address.
    Announce,
    /// Ask whether a deferred response is ready.
    QueryResponse {
        #[arg(value_parser = parse_u8)]
        id: u8,
        /// The command the deferred response answers (0 matches any).
        #[arg(value_parser = parse_u8, default_value = "0")]
        original: u8,
    },
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of devices on the simulated bus.
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=16))]
    pub devices: u8,
    /// Command line for the deferred execute step.
    #[arg(long, default_value = "measure")]
    pub execute: String,
    /// Time the execute takes to finish (e.g. 20ms).
    #[arg(long, default_value = "20ms")]
    pub execute_delay: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex (whitespace, ':' and 0x prefix allowed).
    pub hex: String,
    /// Decode as a response instead of a command.
    #[arg(long)]
    pub response: bool,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(subcommand)]
    pub command: EncodeCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EncodeCommand {
    /// CMD_NONE.
    #[command(name = "none")]
    Empty,
    /// CMD_QUERY_ID.
    QueryId,
    /// CMD_QUERY_RESPONSE.
    QueryResponse {
        #[arg(value_parser = parse_u8)]
        id: u8,
        #[arg(value_parser = parse_u8, default_value = "0")]
        original: u8,
    },
    /// CMD_RESET.
    Reset,
    /// CMD_MASTER_ADDR.
    MasterAddress {
        #[arg(value_parser = parse_u8)]
        address: u8,
    },
    /// CMD_EXECUTE.
    Execute {
        #[arg(value_parser = parse_u8)]
        requester: u8,
        line: String,
    },
    /// CMD_ECHO.
    Echo { text: String },
    /// NOTIFY_CMD_INVALID.
    Invalid {
        #[arg(value_parser = parse_u8)]
        code: u8,
    },
    /// A device-specific command with a hex payload.
    Device {
        #[arg(value_parser = parse_u8)]
        code: u8,
        #[arg(default_value = "")]
        payload: String,
    },
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a byte in decimal or `0x` hex.
pub fn parse_u8(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse::<u8>(),
    };
    parsed.map_err(|_| format!("expected a byte (0-255 or 0x00-0xFF), got {input:?}"))
}

fn parse_device(input: &str) -> Result<(u8, u8), String> {
    let (address, id) = input
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=ID, got {input:?}"))?;
    Ok((parse_u8(address)?, parse_u8(id)?))
}

/// Parse `500ms`, `2s` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// [`parse_duration`], rejecting zero.
pub fn parse_positive_duration(input: &str) -> CliResult<Duration> {
    let duration = parse_duration(input)?;
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u8_accepts_decimal_and_hex() {
        assert_eq!(parse_u8("7"), Ok(7));
        assert_eq!(parse_u8("0x20"), Ok(0x20));
        assert_eq!(parse_u8("0XfE"), Ok(0xFE));
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("0xZZ").is_err());
    }

    #[test]
    fn parse_device_pairs() {
        assert_eq!(parse_device("0x20=7"), Ok((0x20, 7)));
        assert!(parse_device("0x20").is_err());
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0ms").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_positive_duration("0s").is_err());
    }
}

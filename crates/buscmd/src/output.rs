use std::collections::BTreeMap;
use std::io::IsTerminal;

use buscmd_frame::{to_hex, Response};
use buscmd_listener::ListenerStats;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A record the CLI can print in every output format.
pub trait Render: Serialize {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
    fn pretty(&self) -> String;
}

/// Print `records`: one JSON object per line, one table, or one line each.
pub fn print_records<T: Render>(records: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                println!(
                    "{}",
                    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers());
            for record in records {
                table.add_row(record.row());
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!("{}", record.pretty());
            }
        }
    }
}

/// One response read from a device.
#[derive(Debug, Serialize)]
pub struct ResponseRecord {
    pub address: u8,
    pub command: &'static str,
    pub code: &'static str,
    pub response_id: u8,
    pub length: usize,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ResponseRecord {
    pub fn new(address: u8, command: &'static str, response: &Response) -> Self {
        Self {
            address,
            command,
            code: response.code.name(),
            response_id: response.response_id,
            length: response.wire_size(),
            payload: to_hex(&response.payload),
            text: printable(&response.payload),
        }
    }
}

impl Render for ResponseRecord {
    fn headers() -> Vec<&'static str> {
        vec!["ADDRESS", "COMMAND", "CODE", "ID", "LENGTH", "PAYLOAD"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("0x{:02X}", self.address),
            self.command.to_string(),
            self.code.to_string(),
            self.response_id.to_string(),
            self.length.to_string(),
            self.text.clone().unwrap_or_else(|| self.payload.clone()),
        ]
    }

    fn pretty(&self) -> String {
        let mut line = format!(
            "address=0x{:02X} command={} code={} id={} length={} payload={}",
            self.address, self.command, self.code, self.response_id, self.length, self.payload
        );
        if let Some(text) = &self.text {
            line.push_str(&format!(" text={text:?}"));
        }
        line
    }
}

/// A decoded or encoded frame.
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub kind: &'static str,
    pub code: u8,
    pub name: &'static str,
    pub length: usize,
    pub fields: BTreeMap<&'static str, String>,
    pub hex: String,
}

impl Render for FrameRecord {
    fn headers() -> Vec<&'static str> {
        vec!["KIND", "CODE", "NAME", "LENGTH", "FIELDS", "HEX"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.to_string(),
            format!("0x{:02X}", self.code),
            self.name.to_string(),
            self.length.to_string(),
            self.fields_text(),
            self.hex.clone(),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "{} {} (0x{:02X}) length={} {} hex={}",
            self.kind,
            self.name,
            self.code,
            self.length,
            self.fields_text(),
            self.hex
        )
    }
}

impl FrameRecord {
    fn fields_text(&self) -> String {
        self.fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One step of a scripted bus session.
#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub address: u8,
    pub action: String,
    pub outcome: String,
}

impl Render for StepRecord {
    fn headers() -> Vec<&'static str> {
        vec!["STEP", "ADDRESS", "ACTION", "OUTCOME"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.step.to_string(),
            format!("0x{:02X}", self.address),
            self.action.clone(),
            self.outcome.clone(),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "[{}] 0x{:02X} {} -> {}",
            self.step, self.address, self.action, self.outcome
        )
    }
}

/// Listener counters for one device.
#[derive(Debug, Serialize)]
pub struct StatsRecord {
    pub address: u8,
    pub device_id: u8,
    #[serde(flatten)]
    pub stats: ListenerStats,
}

impl Render for StatsRecord {
    fn headers() -> Vec<&'static str> {
        vec![
            "ADDRESS", "DEVICE", "RECEIVED", "BUSY", "MALFORMED", "POSTED", "DELIVERED",
            "DEFERRED", "RESOLVED", "EXPIRED",
        ]
    }

    fn row(&self) -> Vec<String> {
        let s = &self.stats;
        vec![
            format!("0x{:02X}", self.address),
            self.device_id.to_string(),
            s.commands_received.to_string(),
            s.busy_rejections.to_string(),
            s.malformed_frames.to_string(),
            s.responses_posted.to_string(),
            s.responses_delivered.to_string(),
            s.deferred_registered.to_string(),
            s.deferred_resolved.to_string(),
            s.deferred_expired.to_string(),
        ]
    }

    fn pretty(&self) -> String {
        let s = &self.stats;
        format!(
            "address=0x{:02X} device={} received={} busy={} malformed={} posted={} delivered={} deferred={} resolved={} expired={}",
            self.address,
            self.device_id,
            s.commands_received,
            s.busy_rejections,
            s.malformed_frames,
            s.responses_posted,
            s.responses_delivered,
            s.deferred_registered,
            s.deferred_resolved,
            s.deferred_expired
        )
    }
}

/// The payload as text, if it is printable ASCII up to an optional NUL.
pub fn printable(payload: &[u8]) -> Option<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let text = &payload[..end];
    if text.is_empty() || !text.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return None;
    }
    Some(String::from_utf8_lossy(text).into_owned())
}

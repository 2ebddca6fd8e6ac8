//! A sample device built on the listener.
//!
//! [`DemoDevice`] answers `CMD_ECHO` immediately and runs `CMD_EXECUTE` as
//! deferred work that finishes after a fixed delay, so a master sees the
//! full `DEFERRED` / `NOT_READY` / result cycle. The "execution" upper-cases
//! the command line.

use std::time::{Duration, Instant};

use buscmd_frame::{command_name, Command, CommandText, Response, CMD_EXECUTE};
use buscmd_listener::{CommandHandler, DeferredHandle, Disposition, ListenerError, Responder};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Job {
    handle: DeferredHandle,
    command_line: CommandText,
    due: Instant,
}

/// Demo command handler.
#[derive(Debug, Default)]
pub struct DemoDevice {
    execute_delay: Duration,
    jobs: Vec<Job>,
    master_address: Option<u8>,
    resets: u64,
}

impl DemoDevice {
    /// A device whose executes complete after `execute_delay`.
    /// A zero delay answers executes in the same transaction.
    pub fn new(execute_delay: Duration) -> Self {
        Self {
            execute_delay,
            ..Self::default()
        }
    }

    /// Last address announced with `CMD_MASTER_ADDR`.
    pub fn master_address(&self) -> Option<u8> {
        self.master_address
    }

    /// Resets received.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Executes still running.
    pub fn jobs_in_flight(&self) -> usize {
        self.jobs.len()
    }

    fn run(command_line: &CommandText) -> Response {
        Response::ok(command_line.as_bytes().to_ascii_uppercase())
    }

    fn post(responder: &mut Responder<'_>, response: Response) {
        if let Err(err) = responder.post(response) {
            warn!(error = %err, "failed to post response");
        }
    }
}

impl CommandHandler for DemoDevice {
    fn on_begin(&mut self, responder: &mut Responder<'_>) {
        self.jobs.clear();
        info!(device_id = responder.device_id(), "demo device ready");
    }

    fn on_command(&mut self, command: &Command, responder: &mut Responder<'_>) -> Disposition {
        match command {
            Command::Echo { data } => Self::post(responder, Response::echo(data)),
            Command::Execute {
                requester_address,
                command_line,
            } => {
                debug!(
                    requester = requester_address,
                    line = %command_line,
                    "execute requested"
                );
                if self.execute_delay.is_zero() {
                    Self::post(responder, Self::run(command_line));
                    return Disposition::Handled;
                }
                match responder.defer(CMD_EXECUTE) {
                    Ok(handle) => self.jobs.push(Job {
                        handle,
                        command_line: *command_line,
                        due: responder.now() + self.execute_delay,
                    }),
                    Err(ListenerError::RegistryFull { .. }) => {
                        Self::post(responder, Response::busy())
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to defer execute");
                        Self::post(responder, Response::error());
                    }
                }
            }
            Command::Reset => {
                self.resets += 1;
                self.jobs.clear();
                info!(device_id = responder.device_id(), "reset");
            }
            Command::MasterAddress { address } => {
                self.master_address = Some(*address);
                debug!(master = address, "master address recorded");
            }
            Command::InvalidCommand { code } => {
                warn!(code, command = command_name(*code), "master reported invalid command");
            }
            _ => return Disposition::Unhandled,
        }
        Disposition::Handled
    }

    fn on_poll(&mut self, responder: &mut Responder<'_>) {
        let now = responder.now();
        self.jobs.retain(|job| {
            if job.due > now {
                return true;
            }
            debug!(response_id = job.handle.response_id(), "execute finished");
            if let Err(err) = job.handle.complete(Self::run(&job.command_line)) {
                warn!(error = %err, "failed to complete execute");
            }
            false
        });
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use buscmd::demo::DemoDevice;
use buscmd_frame::{command_frame, decode_response, Command, Response, MAX_FRAME_SIZE};
use buscmd_listener::{
    BusMaster, CommandListener, DefaultHandler, DeviceContext, ListenerError, MasterConfig,
    PollDriver, Reply, DEFAULT_POLL_INTERVAL,
};
use buscmd_transport::{BusSlave, BusTransport, SimBus};

use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{io_error, listener_error, CliResult, SUCCESS};
use crate::output::{print_records, printable, OutputFormat, StepRecord};

/// First device address on the simulated bus.
const FIRST_ADDRESS: u8 = 0x20;
/// Address of the device that is never polled automatically.
const CONTENTION_ADDRESS: u8 = 0x7E;
const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Transcript {
    steps: Vec<StepRecord>,
}

impl Transcript {
    fn record(&mut self, address: u8, action: impl Into<String>, outcome: impl Into<String>) {
        self.steps.push(StepRecord {
            step: self.steps.len() + 1,
            address,
            action: action.into(),
            outcome: outcome.into(),
        });
    }
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let execute_delay = parse_duration(&args.execute_delay)?;
    let transcript = simulate(args.devices, &args.execute, execute_delay)?;
    print_records(&transcript.steps, format);
    Ok(SUCCESS)
}

fn simulate(devices: u8, command_line: &str, execute_delay: Duration) -> CliResult<Transcript> {
    let failed = |err| listener_error("simulation failed", err);
    let bus = SimBus::new();
    let mut drivers = Vec::new();
    for index in 0..devices {
        let listener = CommandListener::new(
            DeviceContext::new(index + 1),
            DemoDevice::new(execute_delay),
        )
        .map_err(failed)?;
        let listener = Arc::new(listener);
        listener.begin();
        bus.attach(FIRST_ADDRESS + index, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .map_err(|err| failed(err.into()))?;
        drivers.push(
            PollDriver::spawn(listener, DEFAULT_POLL_INTERVAL)
                .map_err(|err| io_error("poll thread failed", err))?,
        );
    }

    let mut master = BusMaster::with_config(
        bus.clone(),
        MasterConfig {
            response_timeout: Duration::from_secs(1),
            ..MasterConfig::default()
        },
    );
    let mut transcript = Transcript::default();

    for index in 0..devices {
        let address = FIRST_ADDRESS + index;
        let id = master.query_id(address).map_err(failed)?;
        transcript.record(address, "QUERY_ID", format!("OK id={id}"));
        master.announce(address).map_err(failed)?;
        transcript.record(address, "MASTER_ADDR", "sent");
    }

    let target = FIRST_ADDRESS;
    let echoed = master.echo(target, "hello bus").map_err(failed)?;
    transcript.record(target, "ECHO \"hello bus\"", format!("OK {:?}", echoed.to_string_lossy()));

    match master.execute(target, command_line).map_err(failed)? {
        Reply::Ready(response) => {
            transcript.record(target, format!("EXECUTE {command_line:?}"), describe(&response));
        }
        Reply::Deferred(ticket) => {
            transcript.record(
                target,
                format!("EXECUTE {command_line:?}"),
                format!("DEFERRED id={}", ticket.response_id),
            );
            let action = format!("QUERY_RESPONSE id={}", ticket.response_id);
            let deadline = Instant::now() + WAIT_LIMIT;
            let mut not_ready = 0usize;
            let response = loop {
                if let Some(response) = master.query_response(&ticket).map_err(failed)? {
                    break response;
                }
                not_ready += 1;
                if Instant::now() >= deadline {
                    return Err(failed(ListenerError::DeferredTimeout {
                        address: target,
                        response_id: ticket.response_id,
                        timeout: WAIT_LIMIT,
                    }));
                }
                std::thread::sleep(Duration::from_millis(5));
            };
            if not_ready > 0 {
                transcript.record(target, &action, format!("NOT_READY x{not_ready}"));
            }
            transcript.record(target, &action, describe(&response));
            let stale = master.query_response(&ticket).map_err(failed)?;
            let outcome = stale.as_ref().map_or_else(|| "NOT_READY".to_string(), describe);
            transcript.record(target, &action, outcome);
        }
    }

    contention(&bus, &mut transcript).map_err(failed)?;
    drop(drivers);
    Ok(transcript)
}

/// Two commands land before the device polls: the second is answered BUSY
/// and the first is still processed.
fn contention(bus: &SimBus, transcript: &mut Transcript) -> Result<(), ListenerError> {
    let listener = Arc::new(CommandListener::new(
        DeviceContext::new(0xEE),
        DefaultHandler,
    )?);
    bus.attach(CONTENTION_ADDRESS, Arc::clone(&listener) as Arc<dyn BusSlave>)?;

    let mut bus = bus.clone();
    let mut buf = [0u8; MAX_FRAME_SIZE];
    bus.send(CONTENTION_ADDRESS, command_frame(&Command::QueryId)?.as_bytes())?;
    bus.send(CONTENTION_ADDRESS, command_frame(&Command::echo("late"))?.as_bytes())?;
    let n = bus.read(CONTENTION_ADDRESS, &mut buf)?;
    transcript.record(
        CONTENTION_ADDRESS,
        "QUERY_ID + ECHO before poll",
        describe(&decode_response(&buf[..n])?),
    );

    listener.poll();
    let n = bus.read(CONTENTION_ADDRESS, &mut buf)?;
    transcript.record(
        CONTENTION_ADDRESS,
        "poll, read",
        describe(&decode_response(&buf[..n])?),
    );
    bus.detach(CONTENTION_ADDRESS);
    Ok(())
}

fn describe(response: &Response) -> String {
    let mut out = format!("{}", response.code);
    if response.response_id != 0 {
        out.push_str(&format!(" id={}", response.response_id));
    }
    if let Some(id) = response.device_id() {
        out.push_str(&format!(" device={id}"));
    } else if let Some(text) = printable(&response.payload) {
        out.push_str(&format!(" {text:?}"));
    }
    out
}

use buscmd_frame::{command_name, Command, Response, ResponseCode};
use buscmd_listener::{BusMaster, DeferredTicket, MasterConfig, Reply};
use buscmd_transport::{BusTransport, SocketBus};

use crate::cmd::{parse_positive_duration, SendAction, SendArgs};
use crate::exit::{listener_error, transport_error, CliResult, DEVICE_REFUSED, SUCCESS};
use crate::output::{print_records, OutputFormat, ResponseRecord};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let response_timeout = parse_positive_duration(&args.timeout)?;
    let wait_timeout = parse_positive_duration(&args.wait_timeout)?;

    let transport =
        SocketBus::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let mut master = BusMaster::with_config(
        transport,
        MasterConfig {
            response_timeout,
            address: args.master,
            ..MasterConfig::default()
        },
    );

    let Some((command, reply)) = perform(&mut master, args.address, &args.action)? else {
        return Ok(SUCCESS);
    };

    let response = match reply {
        Reply::Ready(response) => response,
        Reply::Deferred(ticket) if args.wait => {
            tracing::debug!(response_id = ticket.response_id, "waiting for deferred reply");
            master
                .wait_deferred(&ticket, wait_timeout)
                .map_err(|err| listener_error("wait failed", err))?
        }
        Reply::Deferred(ticket) => Response::deferred(ticket.response_id),
    };

    print_records(
        &[ResponseRecord::new(args.address, command, &response)],
        format,
    );
    Ok(exit_code(&response))
}

/// Run `action`. Returns `None` for commands that read no response.
fn perform<T: BusTransport>(
    master: &mut BusMaster<T>,
    address: u8,
    action: &SendAction,
) -> CliResult<Option<(&'static str, Reply)>> {
    let failed = |err| listener_error("send failed", err);
    let (command, reply) = match action {
        SendAction::QueryId => (Command::QueryId, None),
        SendAction::Echo { text } => (Command::echo(text), None),
        SendAction::Execute { line } => {
            let reply = master.execute(address, line).map_err(failed)?;
            let command = Command::execute(master.config().address, line);
            (command, Some(reply))
        }
        SendAction::Reset => {
            master.reset(address).map_err(failed)?;
            return Ok(None);
        }
        SendAction::Announce => {
            master.announce(address).map_err(failed)?;
            return Ok(None);
        }
        SendAction::QueryResponse { id, original } => {
            let ticket = DeferredTicket {
                address,
                response_id: *id,
                original_command: *original,
            };
            let reply = match master.query_response(&ticket).map_err(failed)? {
                Some(response) => Reply::Ready(response),
                None => Reply::Ready(Response::not_ready().with_response_id(*id)),
            };
            (Command::query_response(*id, *original), Some(reply))
        }
    };

    let reply = match reply {
        Some(reply) => reply,
        None => master.request(address, &command).map_err(failed)?,
    };
    Ok(Some((command_name(command.code()), reply)))
}

fn exit_code(response: &Response) -> i32 {
    match response.code {
        ResponseCode::Ok | ResponseCode::Deferred | ResponseCode::NotReady => SUCCESS,
        ResponseCode::Busy | ResponseCode::Error | ResponseCode::Unknown => DEVICE_REFUSED,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use buscmd::demo::DemoDevice;
    use buscmd_listener::{CommandListener, DeviceContext, PollDriver, DEFAULT_POLL_INTERVAL};
    use buscmd_transport::{BusSlave, SimBus};

    use super::*;

    fn bus_with_device(address: u8, id: u8) -> (SimBus, PollDriver) {
        let bus = SimBus::new();
        let listener = Arc::new(
            CommandListener::new(DeviceContext::new(id), DemoDevice::new(Default::default()))
                .unwrap(),
        );
        bus.attach(address, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .unwrap();
        let driver = PollDriver::spawn(listener, DEFAULT_POLL_INTERVAL).unwrap();
        (bus, driver)
    }

    fn master(bus: &SimBus) -> BusMaster<SimBus> {
        BusMaster::with_config(
            bus.clone(),
            MasterConfig {
                response_timeout: std::time::Duration::from_secs(2),
                ..MasterConfig::default()
            },
        )
    }

    #[test]
    fn query_id_action_reads_device_id() {
        let (bus, _driver) = bus_with_device(0x20, 7);
        let (command, reply) = perform(&mut master(&bus), 0x20, &SendAction::QueryId)
            .unwrap()
            .unwrap();
        assert_eq!(command, "QUERY_ID");
        let Reply::Ready(response) = reply else {
            panic!("expected ready reply");
        };
        assert_eq!(response.device_id(), Some(7));
    }

    #[test]
    fn reset_action_reads_nothing() {
        let (bus, _driver) = bus_with_device(0x20, 7);
        assert!(perform(&mut master(&bus), 0x20, &SendAction::Reset)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_id_query_is_refused() {
        let (bus, _driver) = bus_with_device(0x20, 7);
        let action = SendAction::QueryResponse { id: 9, original: 0 };
        let (_, reply) = perform(&mut master(&bus), 0x20, &action).unwrap().unwrap();
        let Reply::Ready(response) = reply else {
            panic!("expected ready reply");
        };
        assert_eq!(response.code, ResponseCode::Error);
        assert_eq!(exit_code(&response), DEVICE_REFUSED);
    }
}

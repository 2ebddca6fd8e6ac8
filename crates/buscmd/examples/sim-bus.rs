//! One master and two demo devices on an in-memory bus.
//!
//! Run with:
//!   cargo run --example sim-bus

use std::sync::Arc;
use std::time::Duration;

use buscmd::demo::DemoDevice;
use buscmd::listener::{
    BusMaster, CommandListener, DeviceContext, PollDriver, Reply, DEFAULT_POLL_INTERVAL,
};
use buscmd::transport::{BusSlave, SimBus};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = SimBus::new();
    let mut drivers = Vec::new();
    for (address, device_id) in [(0x20, 1), (0x21, 2)] {
        let listener = Arc::new(CommandListener::new(
            DeviceContext::new(device_id),
            DemoDevice::new(Duration::from_millis(50)),
        )?);
        listener.begin();
        bus.attach(address, Arc::clone(&listener) as Arc<dyn BusSlave>)?;
        drivers.push(PollDriver::spawn(listener, DEFAULT_POLL_INTERVAL)?);
    }

    let mut master = BusMaster::new(bus.clone());
    for address in bus.addresses() {
        let id = master.query_id(address)?;
        eprintln!("0x{address:02X}: device id {id}");
    }

    let echoed = master.echo(0x21, "ping")?;
    eprintln!("0x21 echoed {echoed}");

    match master.execute(0x20, "read sensor")? {
        Reply::Ready(response) => eprintln!("0x20 answered at once: {response:?}"),
        Reply::Deferred(ticket) => {
            eprintln!("0x20 deferred under id {}", ticket.response_id);
            let response = master.wait_deferred(&ticket, Duration::from_secs(1))?;
            eprintln!(
                "0x20 finished: {}",
                String::from_utf8_lossy(&response.payload)
            );
        }
    }

    Ok(())
}

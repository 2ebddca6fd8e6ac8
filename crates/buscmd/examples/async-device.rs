//! Demo devices polled from tokio tasks instead of threads.
//!
//! Run with:
//!   cargo run --example async-device --features async

use std::sync::Arc;
use std::time::Duration;

use buscmd::demo::DemoDevice;
use buscmd::listener::{
    spawn_poll_task, BusMaster, CommandListener, DeviceContext, Reply, DEFAULT_POLL_INTERVAL,
};
use buscmd::transport::{BusSlave, SimBus};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = SimBus::new();
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    for (address, device_id) in [(0x30, 10), (0x31, 11), (0x32, 12)] {
        let listener = Arc::new(CommandListener::new(
            DeviceContext::new(device_id),
            DemoDevice::new(Duration::from_millis(30)),
        )?);
        listener.begin();
        bus.attach(address, Arc::clone(&listener) as Arc<dyn BusSlave>)?;
        tasks.push(spawn_poll_task(listener, DEFAULT_POLL_INTERVAL, cancel.clone()));
    }

    // The master blocks between re-reads, so it runs off the async workers.
    let master_bus = bus.clone();
    let results = tokio::task::spawn_blocking(move || {
        let mut master = BusMaster::new(master_bus);
        let mut lines = Vec::new();
        for address in [0x30, 0x31, 0x32] {
            let reply = master.execute(address, "status")?;
            let line = match reply {
                Reply::Ready(response) => String::from_utf8_lossy(&response.payload).into_owned(),
                Reply::Deferred(ticket) => {
                    let response = master.wait_deferred(&ticket, Duration::from_secs(1))?;
                    format!(
                        "{} (deferred id {})",
                        String::from_utf8_lossy(&response.payload),
                        ticket.response_id
                    )
                }
            };
            lines.push((address, line));
        }
        Ok::<_, buscmd::listener::ListenerError>(lines)
    })
    .await??;

    for (address, line) in results {
        eprintln!("0x{address:02X}: {line}");
    }

    cancel.cancel();
    for task in tasks {
        task.await?;
    }
    Ok(())
}

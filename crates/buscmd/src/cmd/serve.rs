use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use buscmd::demo::DemoDevice;
use buscmd_listener::{CommandListener, DeviceContext, ListenerConfig, PollDriver};
use buscmd_transport::{BusSlave, SimBus, SocketBusServer};

use crate::cmd::{parse_duration, parse_positive_duration, ServeArgs};
use crate::exit::{io_error, listener_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_records, OutputFormat, StatsRecord};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let execute_delay = parse_duration(&args.execute_delay)?;
    let poll_interval = parse_positive_duration(&args.poll_interval)?;
    let config = load_config(&args)?;

    let bus = SimBus::new();
    let mut devices = Vec::with_capacity(args.devices.len());
    for &(address, device_id) in &args.devices {
        let device = DeviceContext::new(device_id).with_config(config.clone());
        let listener = CommandListener::new(device, DemoDevice::new(execute_delay))
            .map_err(|err| listener_error("invalid device", err))?;
        let listener = Arc::new(listener);
        listener.begin();
        bus.attach(address, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .map_err(|err| transport_error(&format!("attach 0x{address:02X} failed"), err))?;
        let driver = PollDriver::spawn(Arc::clone(&listener), poll_interval)
            .map_err(|err| io_error("poll thread failed", err))?;
        tracing::info!(address, device_id, "device attached");
        devices.push((address, listener, driver));
    }

    let server = SocketBusServer::bind_with_bus(&args.path, bus)
        .map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(path = %server.path().display(), "serving bus");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    server
        .serve(&running)
        .map_err(|err| transport_error("serve failed", err))?;

    let records: Vec<StatsRecord> = devices
        .into_iter()
        .map(|(address, listener, mut driver)| {
            driver.stop();
            StatsRecord {
                address,
                device_id: listener.device().device_id,
                stats: listener.stats(),
            }
        })
        .collect();
    print_records(&records, format);
    Ok(SUCCESS)
}

fn load_config(args: &ServeArgs) -> CliResult<ListenerConfig> {
    let Some(path) = &args.config else {
        return Ok(ListenerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    ListenerConfig::from_json(&text).map_err(|err| listener_error("invalid config", err))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

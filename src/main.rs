use clap::Parser;
use log::{error, info, warn};
use renpho_ble_bridge::bluetooth::DeviceAddress;
use renpho_ble_bridge::config::{self, Config};
use renpho_ble_bridge::coordinator::{CoordinatorDeps, GattPoller, IntervalPollPolicy};
use renpho_ble_bridge::input::simulation::{SimulatedRadio, SimulatedScale, run_advertiser};
use renpho_ble_bridge::integration::ScaleIntegration;
use renpho_ble_bridge::output::MqttSink;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Scale simulated when no device is configured.
const DEMO_SCALE: DeviceAddress = DeviceAddress::new([0xC8, 0x47, 0x8C, 0x10, 0xEE, 0xFF]);

#[derive(Parser)]
#[command(name = "renpho-ble-bridge")]
#[command(about = "Coordinates passive advertisements and active polls for Renpho BLE scales")]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scale address to coordinate (repeatable)
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Adapter that carries connections
    #[arg(long)]
    adapter: Option<String>,

    /// Add every supported scale that advertises
    #[arg(long)]
    auto_discover: bool,

    /// Seconds between active polls of one scale
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Deadline for connect and read of one poll, in seconds
    #[arg(long)]
    poll_timeout: Option<u64>,

    /// Publish entity states to MQTT
    #[arg(long)]
    mqtt: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if !self.devices.is_empty() {
            config.bluetooth.devices = self.devices.clone();
        }
        if let Some(adapter) = &self.adapter {
            config.bluetooth.adapter = adapter.clone();
        }
        if self.auto_discover {
            config.bluetooth.auto_discover = true;
        }
        if let Some(secs) = self.poll_interval {
            config.poll.interval_secs = secs;
        }
        if let Some(secs) = self.poll_timeout {
            config.poll.timeout_secs = secs;
        }
        if self.mqtt {
            config.mqtt.enabled = true;
        }
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Load .env file before the runtime spawns its worker threads
    config::load_dotenv();
    init_logger();
    info!("Starting Renpho BLE bridge");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run());
}

async fn run() {
    let cli = Cli::parse();
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);

    let addresses = match config.validate().and_then(|()| config.device_addresses()) {
        Ok(addresses) => addresses,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded:");
    info!("  Adapter: {}", config.bluetooth.adapter);
    info!("  Devices: {}", addresses.len());
    info!("  Poll interval: {:?}", config.poll_interval());
    info!("  Poll deadline: {:?}", config.poll_deadline());
    info!(
        "  MQTT: {}",
        if config.mqtt.enabled { "enabled" } else { "disabled" }
    );

    // The host Bluetooth stack is not part of the bridge; simulate it
    let simulated: Vec<DeviceAddress> = if addresses.is_empty() {
        warn!("No devices configured, simulating {} for discovery", DEMO_SCALE);
        config.bluetooth.auto_discover = true;
        vec![DEMO_SCALE]
    } else {
        addresses.clone()
    };
    let radio = Arc::new(simulated.iter().fold(
        SimulatedRadio::new(config.bluetooth.adapter.clone()),
        |radio, address| radio.with_scale(SimulatedScale::new(*address, 72_500.0, 95)),
    ));

    let deps = CoordinatorDeps {
        policy: Arc::new(IntervalPollPolicy::new(config.poll_interval())),
        poller: Arc::new(GattPoller::new(
            radio.clone(),
            config.poll_deadline(),
            config.disconnect_grace(),
        )),
        radio: radio.clone(),
    };

    let cancel = CancellationToken::new();
    let mut integration = ScaleIntegration::new(deps, config.bluetooth.auto_discover);
    let mqtt_task = if config.mqtt.enabled {
        info!(
            "[MQTT] Connecting to {}:{}",
            config.mqtt.broker_host, config.mqtt.broker_port
        );
        let (sink, driver) = MqttSink::new(&config.mqtt);
        integration = integration.with_sink(sink);
        Some(tokio::spawn(driver.run(cancel.clone())))
    } else {
        None
    };

    for address in &addresses {
        if let Err(e) = integration.add_device(*address).await {
            error!("Failed to add {}: {}", address, e);
            std::process::exit(1);
        }
    }

    let integration = Arc::new(integration);
    let (events_tx, events_rx) = mpsc::channel(64);
    let advertiser = run_advertiser(
        radio.clone(),
        config.simulation_interval(),
        events_tx,
        cancel.clone(),
    );
    let integration_task = integration.clone().start(events_rx, cancel.clone());

    info!("Renpho BLE bridge is running");
    info!("  - Press Ctrl+C to exit");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Shutdown
    cancel.cancel();
    if let Err(e) = advertiser.await {
        warn!("Advertiser task ended abnormally: {}", e);
    }
    if let Err(e) = integration_task.await {
        warn!("Integration task ended abnormally: {}", e);
    }
    if let Some(task) = mqtt_task
        && let Err(e) = task.await
    {
        warn!("MQTT task ended abnormally: {}", e);
    }

    info!("Renpho BLE bridge stopped");
}

//! Command-line interface for zigbridge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use zigbridge_core::config::{env_vars, BridgeConfig};
use zigbridge_core::eventbus::EventBus;
use zigbridge_core::ids::Eui64;
use zigbridge_core::scheduler::Scheduler;
use zigbridge_core::storage::{KvStore, MemoryStore};
use zigbridge_devices::zcl::{self, data_type};
use zigbridge_devices::{
    CapabilityLayer, DeviceModel, DeviceTarget, MqttBridge, MqttPublisher, QuirksEngine,
    SimulatedStack, ZigbeeAdapter,
};
use zigbridge_storage::RedbStore;

/// Zigbee to MQTT bridge core.
#[derive(Parser, Debug)]
#[command(name = "zigbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge against the simulated radio stack.
    Run {
        /// Stop after this many seconds.
        #[arg(short, long, default_value_t = 6)]
        seconds: u64,
    },
    /// Print the effective quirk table.
    Quirks,
    /// Print the effective configuration.
    Config,
}

/// Publisher that writes MQTT traffic to the log.
struct LogPublisher;

impl MqttPublisher for LogPublisher {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> zigbridge_core::Result<()> {
        tracing::info!(
            topic,
            retain,
            "MQTT {}",
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::load(args.config.as_deref()).context("loading configuration")?;

    match args.command {
        Command::Run { seconds } => run(config, Duration::from_secs(seconds)).await,
        Command::Quirks => print_quirks(&config),
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "zigbridge=debug" } else { "zigbridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

fn build_quirks(config: &BridgeConfig) -> Result<QuirksEngine> {
    let mut quirks = QuirksEngine::with_builtin();
    let extra = quirks
        .register_from_config(&config.quirks)
        .context("registering configured quirks")?;
    if extra > 0 {
        tracing::info!(count = extra, "Configured quirks registered");
    }
    Ok(quirks)
}

fn print_quirks(config: &BridgeConfig) -> Result<()> {
    let quirks = build_quirks(config)?;
    for (index, entry) in quirks.entries().iter().enumerate() {
        println!(
            "{index:>2}  {} / {} ({:?})",
            entry.manufacturer, entry.model, entry.match_mode
        );
        for action in &entry.actions {
            println!("      {action}");
        }
    }
    Ok(())
}

fn open_store(config: &BridgeConfig) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match &config.storage.path {
        Some(path) => Arc::new(
            RedbStore::open(path).with_context(|| format!("opening storage at {path}"))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

async fn run(config: BridgeConfig, duration: Duration) -> Result<()> {
    let store = open_store(&config)?;
    let bus = Arc::new(EventBus::with_limits(
        config.event_bus.max_handlers_per_event,
        config.event_bus.max_publish_depth,
    ));
    let stack = Arc::new(SimulatedStack::new());
    let adapter = Arc::new(
        ZigbeeAdapter::new(
            &config.adapter,
            bus,
            DeviceModel::shared(),
            Arc::new(build_quirks(&config)?),
            stack.clone(),
        )
        .with_store(store),
    );
    let caps = CapabilityLayer::new(adapter.clone());
    let bridge = MqttBridge::new(&config.mqtt, caps.clone(), Arc::new(LogPublisher));
    bridge.attach()?;
    tracing::info!(filter = %bridge.command_topic_filter(), "Listening for commands");

    adapter.init()?;
    adapter.start_coordinator()?;
    // The simulated stack forms on the persisted network when there is one
    let (pan_id, channel) = match adapter.persisted_network()? {
        Some(network) => (network.pan_id, network.channel),
        None => (0x1A62, 15),
    };
    adapter.on_network_formed(zcl::status::SUCCESS, pan_id, channel)?;
    adapter.set_permit_join(60)?;

    let mut scheduler = Scheduler::new();
    scheduler.register(Box::new(adapter.sweep_poller()));
    let sweeper = scheduler.spawn(Duration::from_millis(config.adapter.sweep_interval_ms));

    simulate_devices(&adapter, &stack, &caps, &bridge)?;

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }
    sweeper.abort();

    bridge.publish_devices();
    println!("{}", serde_json::to_string_pretty(&bridge.snapshot())?);
    tracing::info!(
        devices = adapter.cached_devices(),
        pending = adapter.pending_commands(),
        "Bridge stopped"
    );
    Ok(())
}

/// Drive a bulb and a sensor through join, interview, reports and commands.
///
/// The last command is never confirmed so the sweep reports its timeout.
fn simulate_devices(
    adapter: &Arc<ZigbeeAdapter>,
    stack: &SimulatedStack,
    caps: &CapabilityLayer,
    bridge: &MqttBridge,
) -> Result<()> {
    let bulb = Eui64(0x00124B001234ABCD);
    let sensor = Eui64(0x00158D0000000001);

    adapter.on_device_announce(bulb, 0x1234)?;
    adapter.on_device_announce(sensor, 0x5678)?;
    for (nwk, manufacturer, model) in [
        (0x1234, "IKEA of Sweden", "TRADFRI bulb E27 WS opal 980lm"),
        (0x5678, "LUMI", "lumi.weather"),
    ] {
        adapter.on_attribute_report(
            nwk,
            1,
            zcl::cluster::BASIC,
            zcl::basic_attrs::MANUFACTURER_NAME,
            data_type::CHAR_STRING,
            &length_prefixed(manufacturer),
        )?;
        adapter.on_attribute_report(
            nwk,
            1,
            zcl::cluster::BASIC,
            zcl::basic_attrs::MODEL_IDENTIFIER,
            data_type::CHAR_STRING,
            &length_prefixed(model),
        )?;
    }

    adapter.on_attribute_report(
        0x5678,
        1,
        zcl::cluster::TEMPERATURE_MEASUREMENT,
        zcl::attrs::MEASURED_VALUE,
        data_type::INT16,
        &2150i16.to_le_bytes(),
    )?;
    caps.configure_reporting(
        DeviceTarget::new(sensor, 1),
        zigbridge_devices::CapabilityId::Temperature,
    )?;
    confirm_last(adapter, stack)?;

    let light = caps.light(DeviceTarget::new(bulb, 1));
    light.on()?;
    confirm_last(adapter, stack)?;
    adapter.on_attribute_report(0x1234, 1, zcl::cluster::ON_OFF, zcl::attrs::ON_OFF, data_type::BOOLEAN, &[1])?;

    bridge.handle_message(
        &format!("{}/{}/set", bridge.base_topic(), bulb.to_hex()),
        br#"{"brightness": 0}"#,
    )?;
    confirm_last(adapter, stack)?;

    light.set_color_temp(370)?;
    Ok(())
}

fn confirm_last(adapter: &ZigbeeAdapter, stack: &SimulatedStack) -> Result<()> {
    if let Some(seq) = stack.last_sequence() {
        adapter.on_command_status(seq, zcl::status::SUCCESS)?;
    }
    Ok(())
}

fn length_prefixed(s: &str) -> Vec<u8> {
    let mut raw = Vec::with_capacity(s.len() + 1);
    raw.push(s.len() as u8);
    raw.extend_from_slice(s.as_bytes());
    raw
}

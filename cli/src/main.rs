// nearcast: command-line front end for the Nearcast core
//
// Shows host device metadata, manages config.json and runs an end-to-end
// demo over the in-memory loopback radio.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use nearcast_core::device::{property, DiscoveryCallback, RadioDevice};
use nearcast_core::platform::{
    DeviceEvent, DeviceInfo, HostDeviceInfo, PropertyMap, PropertyValue, ScanEvent, ScanResult,
};
use nearcast_core::presence::ScanRequest;
use nearcast_core::{
    BroadcastRequest, BroadcastStatus, Drivers, IdentityKind, LoopbackRadio, MediumKind,
    NearbyCore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nearcast")]
#[command(about = "Nearcast: nearby presence and connections", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show host device information
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run discovery, a channel round trip, a broadcast and a scan over the loopback radio
    Demo,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    let device_info = HostDeviceInfo::new(config.core.app_name.clone());

    let _log_guard = init_logging(cli.verbose, &device_info.log_path())?;
    tracing::debug!("Config loaded from {}", config.path().display());

    match cli.command {
        Commands::Info { json } => cmd_info(&device_info, json),
        Commands::Config { action } => cmd_config(config, action),
        Commands::Demo => cmd_demo(config).await,
    }
}

/// Console logging plus a daily rolling file under the host log directory
fn init_logging(
    verbose: bool,
    log_dir: &Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "nearcast.log"));

    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

fn cmd_info(info: &HostDeviceInfo, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "device_name": info.os_device_name(),
            "device_type": info.device_type(),
            "full_name": info.full_name(),
            "user_name": info.profile_user_name(),
            "download_path": info.download_path(),
            "app_data_path": info.local_app_data_path(),
            "temporary_path": info.temporary_path(),
            "log_path": info.log_path(),
            "crash_dump_path": info.crash_dump_path(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let unknown = || "(unknown)".dimmed().to_string();
    println!("{}", "Device Information".bold());
    println!();
    println!(
        "  {:<16} {}",
        "Device name".bright_cyan(),
        info.os_device_name().unwrap_or_else(unknown)
    );
    println!("  {:<16} {:?}", "Device type".bright_cyan(), info.device_type());
    println!(
        "  {:<16} {}",
        "Full name".bright_cyan(),
        info.full_name().unwrap_or_else(unknown)
    );
    println!(
        "  {:<16} {}",
        "User".bright_cyan(),
        info.profile_user_name().unwrap_or_else(unknown)
    );
    println!();
    println!("{}", "Paths".bold());
    for (label, path) in [
        ("Downloads", info.download_path()),
        ("App data", info.local_app_data_path()),
        ("Temporary", info.temporary_path()),
        ("Logs", info.log_path()),
        ("Crash dumps", info.crash_dump_path()),
    ] {
        println!("  {:<16} {}", label.bright_cyan(), path.display());
    }

    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  {}", config.path().display().to_string().dimmed());
            println!();

            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

/// Prints discovery events as they arrive
struct DiscoveryPrinter;

impl DiscoveryCallback for DiscoveryPrinter {
    fn device_discovered(&self, device: &RadioDevice) {
        println!(
            "  {} Discovered {} ({})",
            "•".bright_green(),
            device.name().bright_cyan(),
            device.mac_address()
        );
    }

    fn device_name_changed(&self, device: &RadioDevice) {
        println!(
            "  {} Device {} renamed to {}",
            "•".bright_green(),
            device.unique_id(),
            device.name().bright_cyan()
        );
    }

    fn device_lost(&self, device: &RadioDevice) {
        println!(
            "  {} Lost {} (still cached as {:?})",
            "•".yellow(),
            device.name().bright_cyan(),
            device.state()
        );
    }
}

fn properties(entries: &[(&str, &str)]) -> PropertyMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), PropertyValue::Str(v.to_string())))
        .collect()
}

async fn cmd_demo(config: config::Config) -> Result<()> {
    println!("{}", "Nearcast loopback demo".bold());
    println!();

    let radio = LoopbackRadio::new();
    let core = NearbyCore::new(config.core.clone(), Drivers::loopback(&radio));
    core.start()?;

    // Discovery
    println!("{}", "Discovery".bold());
    let printer = Arc::new(DiscoveryPrinter);
    core.devices().start_discovery(&printer)?;
    let device_events = radio.device_events();
    radio.emit_device_event(DeviceEvent::Discovered {
        object_path: "/loopback/dev_1".to_string(),
        properties: properties(&[
            (property::NAME, "Pixel"),
            (property::ADDRESS, "AA:BB:CC:00:00:01"),
        ]),
    });
    radio.emit_device_event(DeviceEvent::PropertiesChanged {
        object_path: "/loopback/dev_1".to_string(),
        changed: properties(&[(property::NAME, "Pixel-7")]),
    });
    radio.emit_device_event(DeviceEvent::Lost {
        object_path: "/loopback/dev_1".to_string(),
    });
    core.devices().run(device_events.take(3)).await;
    core.devices().stop_discovery()?;
    println!();

    // Channel round trip
    println!("{}", "Channel".bold());
    radio.set_echo(true);
    let connection_events = radio.connection_events();
    let channel = core.channels().open("peer-demo");
    channel.register_read_callback(Arc::new(|bytes: Vec<u8>| {
        println!(
            "  {} Received {:?}",
            "✓".green(),
            String::from_utf8_lossy(&bytes)
        );
    }))?;
    channel.write(b"hello over loopback")?;
    core.channels().run(connection_events.take(1)).await;
    println!();

    // Broadcast and scan
    println!("{}", "Presence".bold());
    let broadcast = core.sessions().start_broadcast(
        &BroadcastRequest::new(IdentityKind::Public, b"nearcast".to_vec()),
        Arc::new(|status: BroadcastStatus| {
            println!("  {} Broadcast status: {:?}", "•".bright_green(), status);
        }),
    )?;
    println!("  {} Broadcast {} live", "✓".green(), broadcast.to_string().bright_cyan());

    let mut scan = core.sessions().start_scan(
        &ScanRequest::new().with_service_id("nearcast"),
        Arc::new(|event: ScanEvent| match event {
            ScanEvent::Found(result) => println!(
                "  {} Found {} at {} dBm",
                "•".bright_green(),
                result.address.bright_cyan(),
                result.rssi
            ),
            other => println!("  {} Scan event: {:?}", "•".bright_green(), other),
        }),
    )?;
    radio.emit_scan_result(ScanResult {
        medium: MediumKind::Ble,
        address: "AA:BB:CC:00:00:02".to_string(),
        rssi: -52,
        service_id: "nearcast".to_string(),
        payload: b"hi".to_vec(),
    });

    scan.stop()?;
    core.sessions().stop_broadcast(broadcast);
    core.stop();

    println!();
    println!("{} Demo complete", "✓".green());
    Ok(())
}

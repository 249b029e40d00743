//! SpotPress Daemon
//!
//! Turns input from handheld presentation remotes into overlay actions
//! (spotlight, laser, magnifier, pen) and synthetic key presses.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use evdev::KeyCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spotpressd::{
    config::{load_shared_config, new_shared_config, Config},
    context::AppContext,
    dbus::{init_dbus_service, spawn_signal_forwarder},
    device_class::DeviceTree,
    hotplug::HotplugMonitor,
    output::{InputSink, NullSink, UinputSink},
    overlay::OverlayController,
    registry::DeviceRegistry,
};

/// SpotPress Daemon - presentation remote input layer
#[derive(Parser, Debug)]
#[command(name = "spotpressd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/spotpress/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List all supported remotes and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("SpotPress daemon starting...");

    let tree = DeviceTree::default();

    if args.list_devices {
        list_devices(&tree);
        return Ok(());
    }

    // Shared so ReloadConfig can swap it
    let shared_config = match load_shared_config(args.config.as_deref()) {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            new_shared_config()
        }
    };
    let config: Config = shared_config
        .read()
        .map(|c| c.clone())
        .unwrap_or_default();

    let chord: Vec<KeyCode> = config
        .presentation_chord
        .iter()
        .map(|&code| KeyCode::new(code))
        .collect();
    let output: Arc<dyn InputSink> = match UinputSink::create(&config.virtual_device_name, &chord) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("Virtual output device unavailable, synthetic input disabled: {}", e);
            Arc::new(NullSink)
        }
    };

    let overlay = Arc::new(OverlayController::new(&config.overlay));
    let ctx = Arc::new(AppContext::new(overlay.clone(), output, &config.presentation_chord));
    let registry = Arc::new(DeviceRegistry::new(tree.clone(), ctx, shared_config.clone()));

    // Watch before enumerating so nodes created in between are not missed
    let monitor = match HotplugMonitor::start(&tree) {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            warn!("Hotplug monitoring unavailable, only devices present now will be used: {}", e);
            None
        }
    };

    registry.start().await;

    let dbus = match init_dbus_service(overlay.clone(), registry.clone(), shared_config.clone()).await {
        Ok(connection) => {
            let forwarder = spawn_signal_forwarder(connection.clone(), &overlay, &registry);
            Some((connection, forwarder))
        }
        Err(e) => {
            warn!("Failed to initialize D-Bus service: {}", e);
            warn!("Overlay commands will not reach the renderer");
            None
        }
    };

    let hotplug_registry = registry.clone();
    let hotplug_handle = tokio::spawn(async move {
        let mut monitor = match monitor {
            Some(monitor) => monitor,
            None => return std::future::pending().await,
        };
        while let Some(event) = monitor.next().await {
            // Adds may wait for sysfs to settle; removals must not queue behind them
            let registry = hotplug_registry.clone();
            tokio::spawn(async move {
                registry.on_hotplug(event).await;
            });
        }
        warn!("Hotplug stream ended");
    });

    info!("Daemon running. Press Ctrl+C to exit.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = hotplug_handle => {
            if let Err(e) = result {
                error!("Hotplug task panicked: {:?}", e);
            }
        }
    }

    registry.shutdown().await;
    if let Some((_connection, forwarder)) = dbus {
        forwarder.abort();
    }

    info!("SpotPress daemon stopped");
    Ok(())
}

/// Print every recognized node
fn list_devices(tree: &DeviceTree) {
    println!("Scanning for presentation remotes...\n");

    let found: Vec<_> = tree
        .scan()
        .into_iter()
        .filter_map(|path| tree.identify(&path))
        .collect();

    if found.is_empty() {
        println!("No supported remotes found.");
        println!("\nTroubleshooting:");
        println!("  - Ensure the remote is paired or its dongle is plugged in");
        println!("  - Check that udev rules are installed");
        println!("  - Verify user is in 'input' group");
        return;
    }

    println!("Found {} node(s):\n", found.len());
    for (i, (class, probe)) in found.iter().enumerate() {
        println!("{}. {} [{}]", i + 1, class.description, class.kind);
        println!("   Path:    {:?}", probe.path);
        println!("   Name:    {}", probe.name);
        println!("   Vendor:  0x{:04X}", probe.vendor_id);
        println!("   Product: 0x{:04X}", probe.product_id);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_config() {
        let args = Args::parse_from(["spotpressd"]);
        assert_eq!(args.config, None);
        assert!(!args.verbose);
        assert!(!args.list_devices);
    }

    #[test]
    fn test_args_config_path() {
        let args = Args::parse_from(["spotpressd", "--config", "/tmp/spotpress.json"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/spotpress.json")));
    }

    #[test]
    fn test_args_verbose() {
        let args = Args::parse_from(["spotpressd", "-v"]);
        assert!(args.verbose);
    }

    #[test]
    fn test_args_list_devices() {
        let args = Args::parse_from(["spotpressd", "--list-devices"]);
        assert!(args.list_devices);
    }
}

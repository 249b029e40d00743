//! D-Bus IPC server for the SpotPress daemon
//!
//! Implements the org.spotpress.Daemon interface used by the overlay
//! renderer and the preferences UI.
//!
//! ## Interface: org.spotpress.Daemon
//!
//! ### Methods:
//! - `SetMode(mode: s) -> b` - Switch to a named mode
//! - `SwitchMode(step: i)` - Cycle through the compatible modes
//! - `ListDevices() -> a(ssb)` - Registered devices as (id, description, active)
//! - `SetActiveDevice(id: s) -> b` - Hand control to another remote
//! - `ShowOverlay()`, `HideOverlay()`, `SetAutoMode(b)`, `SetDrawing(b)`
//! - `ReloadConfig()` - Re-read the configuration file
//!
//! ### Signals:
//! - `ModeChanged(s)`, `VisibilityChanged(b)`, `AutoModeChanged(b)`
//! - `SettingChanged(s, i)`, `DrawingCleared(b)`, `PenPathFinished()`
//! - `DevicesChanged()` - Membership or active device changed

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::config::{reload_shared_config, SharedConfig};
use crate::device_class::DeviceKind;
use crate::mode::Mode;
use crate::overlay::{Overlay, OverlayCommand, OverlayController};
use crate::registry::{DeviceRegistry, RegistryEvent};

/// D-Bus interface name
pub const DBUS_INTERFACE: &str = "org.spotpress.Daemon";

/// D-Bus object path
pub const DBUS_PATH: &str = "/org/spotpress/Daemon";

/// D-Bus bus name
pub const DBUS_NAME: &str = "org.spotpress";

pub struct SpotpressService {
    version: String,
    overlay: Arc<OverlayController>,
    registry: Arc<DeviceRegistry>,
    config: SharedConfig,
}

impl SpotpressService {
    pub fn new(overlay: Arc<OverlayController>, registry: Arc<DeviceRegistry>, config: SharedConfig) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            overlay,
            registry,
            config,
        }
    }
}

#[interface(name = "org.spotpress.Daemon")]
impl SpotpressService {
    // =========================================================================
    // METHODS
    // =========================================================================

    /// Switch to `mode` if the active remote supports it
    async fn set_mode(&self, mode: &str) -> fdo::Result<bool> {
        let mode: Mode = mode
            .parse()
            .map_err(|e| fdo::Error::InvalidArgs(format!("{}", e)))?;
        tracing::info!(%mode, "SetMode called");
        Ok(self.overlay.set_mode(mode))
    }

    async fn switch_mode(&self, step: i32) -> fdo::Result<()> {
        tracing::debug!(step, "SwitchMode called");
        self.overlay.switch_mode(step);
        Ok(())
    }

    async fn list_devices(&self) -> fdo::Result<Vec<(String, String, bool)>> {
        Ok(self
            .registry
            .list()
            .await
            .into_iter()
            .map(|info| (info.kind.id().to_string(), info.description.to_string(), info.active))
            .collect())
    }

    /// Start switching to `id`; `false` if unknown, already active or busy
    async fn set_active_device(&self, id: &str) -> fdo::Result<bool> {
        let kind: DeviceKind = id.parse().map_err(fdo::Error::InvalidArgs)?;
        tracing::info!(device = %kind, "SetActiveDevice called");

        if self.registry.device(kind).await.is_none() {
            tracing::warn!(device = %kind, "Device is not connected");
            return Ok(false);
        }
        Ok(self.registry.set_active(kind).is_some())
    }

    async fn show_overlay(&self) -> fdo::Result<()> {
        self.overlay.show_overlay();
        Ok(())
    }

    async fn hide_overlay(&self) -> fdo::Result<()> {
        self.overlay.hide_overlay();
        Ok(())
    }

    async fn set_auto_mode(&self, enable: bool) -> fdo::Result<()> {
        tracing::info!(enable, "SetAutoMode called");
        self.overlay.set_auto_mode(enable);
        Ok(())
    }

    /// Reported by the renderer while a pen stroke is in progress
    async fn set_drawing(&self, drawing: bool) -> fdo::Result<()> {
        self.overlay.set_drawing(drawing);
        Ok(())
    }

    /// Re-read the configuration file
    ///
    /// Gesture timing overrides apply to remotes connected after the reload.
    async fn reload_config(&self) -> fdo::Result<()> {
        tracing::info!("ReloadConfig called - reloading configuration from disk");
        match reload_shared_config(&self.config) {
            Ok(()) => {
                tracing::info!("Configuration reloaded successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration");
                Err(fdo::Error::Failed(format!("Config reload failed: {}", e)))
            }
        }
    }

    // =========================================================================
    // SIGNALS
    // =========================================================================

    #[zbus(signal)]
    async fn mode_changed(emitter: &SignalEmitter<'_>, mode: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn visibility_changed(emitter: &SignalEmitter<'_>, visible: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn auto_mode_changed(emitter: &SignalEmitter<'_>, enabled: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn setting_changed(emitter: &SignalEmitter<'_>, name: &str, value: i32) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn drawing_cleared(emitter: &SignalEmitter<'_>, all: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn pen_path_finished(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn devices_changed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    #[zbus(property)]
    async fn current_mode(&self) -> String {
        self.overlay.mode().as_str().to_string()
    }

    /// Get daemon version
    #[zbus(property)]
    async fn daemon_version(&self) -> &str {
        &self.version
    }
}

/// Initialize and run the D-Bus service
///
/// Connects to the session bus, registers the service name, and exports
/// the interface at [`DBUS_PATH`].
pub async fn init_dbus_service(
    overlay: Arc<OverlayController>,
    registry: Arc<DeviceRegistry>,
    config: SharedConfig,
) -> zbus::Result<zbus::Connection> {
    let service = SpotpressService::new(overlay, registry, config);

    let connection = zbus::connection::Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        name = DBUS_NAME,
        path = DBUS_PATH,
        "D-Bus service registered"
    );

    Ok(connection)
}

enum Outbound {
    Overlay(OverlayCommand),
    Devices,
}

async fn emit(emitter: &SignalEmitter<'_>, outbound: Outbound) -> zbus::Result<()> {
    match outbound {
        Outbound::Overlay(OverlayCommand::ModeChanged(mode)) => {
            SpotpressService::mode_changed(emitter, mode.as_str()).await
        }
        Outbound::Overlay(OverlayCommand::VisibilityChanged(visible)) => {
            SpotpressService::visibility_changed(emitter, visible).await
        }
        Outbound::Overlay(OverlayCommand::AutoModeChanged(enabled)) => {
            SpotpressService::auto_mode_changed(emitter, enabled).await
        }
        Outbound::Overlay(OverlayCommand::SettingChanged(setting, value)) => {
            SpotpressService::setting_changed(emitter, setting.as_str(), value).await
        }
        Outbound::Overlay(OverlayCommand::DrawingCleared { all }) => {
            SpotpressService::drawing_cleared(emitter, all).await
        }
        Outbound::Overlay(OverlayCommand::PenPathFinished) => {
            SpotpressService::pen_path_finished(emitter).await
        }
        Outbound::Devices => SpotpressService::devices_changed(emitter).await,
    }
}

/// Forward overlay commands and registry changes as signals
pub fn spawn_signal_forwarder(
    connection: zbus::Connection,
    overlay: &OverlayController,
    registry: &DeviceRegistry,
) -> JoinHandle<()> {
    let commands = BroadcastStream::new(overlay.subscribe()).filter_map(|item| match item {
        Ok(command) => Some(Outbound::Overlay(command)),
        Err(e) => {
            tracing::warn!(error = %e, "Overlay signal stream lagged");
            None
        }
    });
    let devices = BroadcastStream::new(registry.subscribe()).filter_map(|item| match item {
        Ok(RegistryEvent::DeviceAdded(_) | RegistryEvent::DeviceRemoved(_) | RegistryEvent::ActiveChanged(_)) => {
            Some(Outbound::Devices)
        }
        Ok(RegistryEvent::PathAdded(..)) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Device signal stream lagged");
            None
        }
    });

    tokio::spawn(async move {
        let emitter = match SignalEmitter::new(&connection, DBUS_PATH) {
            Ok(emitter) => emitter,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create signal emitter");
                return;
            }
        };

        let mut outbound = Box::pin(commands.merge(devices));
        while let Some(item) = outbound.next().await {
            if let Err(e) = emit(&emitter, item).await {
                tracing::warn!(error = %e, "Failed to emit D-Bus signal");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{new_shared_config, OverlayDefaults};
    use crate::context::AppContext;
    use crate::device_class::DeviceTree;
    use crate::output::NullSink;

    fn service() -> SpotpressService {
        let overlay = Arc::new(OverlayController::new(&OverlayDefaults::default()));
        let ctx = Arc::new(AppContext::new(overlay.clone(), Arc::new(NullSink), &[42, 63]));
        let config = new_shared_config();
        let registry = Arc::new(DeviceRegistry::new(DeviceTree::default(), ctx, config.clone()));
        SpotpressService::new(overlay, registry, config)
    }

    #[test]
    fn test_dbus_constants() {
        assert_eq!(DBUS_INTERFACE, "org.spotpress.Daemon");
        assert_eq!(DBUS_PATH, "/org/spotpress/Daemon");
        assert_eq!(DBUS_NAME, "org.spotpress");
    }

    #[test]
    fn test_service_creation() {
        let service = service();
        assert!(!service.version.is_empty());
        assert_eq!(service.overlay.mode(), Mode::Mouse);
    }

    #[tokio::test]
    async fn test_set_mode_parses_names() {
        let service = service();
        assert!(service.set_mode("laser").await.unwrap());
        assert_eq!(service.current_mode().await, "laser");
        assert!(service.set_mode("disco").await.is_err());
    }

    #[tokio::test]
    async fn test_set_active_device_requires_known_device() {
        let service = service();
        assert!(service.set_active_device("nope").await.is_err());
        assert!(!service.set_active_device("asa-composite").await.unwrap());
    }
}

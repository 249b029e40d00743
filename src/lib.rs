//! SpotPress Daemon Library
//!
//! Device layer for presentation remotes: node discovery, raw and generic
//! readers, gesture decoding and per-device dispatch. Public API for
//! testing and integration.

pub mod config;
pub mod context;
pub mod dbus;
pub mod decoders;
pub mod device_class;
pub mod evdev;
pub mod gesture;
pub mod hidraw;
pub mod hotplug;
pub mod mode;
pub mod output;
pub mod overlay;
pub mod registry;
pub mod runtime;

/// Re-export commonly used types
pub use config::{load_shared_config, new_shared_config, Config, SharedConfig};
pub use context::AppContext;
pub use dbus::{init_dbus_service, SpotpressService, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use device_class::{DeviceClass, DeviceKind, DeviceTree};
pub use gesture::{ActionToken, Gesture, GestureConfig, GestureMachine};
pub use hotplug::{HotplugAction, HotplugEvent, HotplugMonitor};
pub use mode::Mode;
pub use overlay::{Overlay, OverlayCommand, OverlayController};
pub use registry::{DeviceInfo, DeviceRegistry, RegistryEvent};
pub use runtime::{KnownPathSet, PointerDevice};

//! Virtual output device
//!
//! Synthetic keys, chords and passed-through motion are written to a single
//! uinput device shared by every remote.

use std::sync::Mutex;

use evdev::uinput::VirtualDevice;
use evdev::{AttributeSet, KeyCode, RelativeAxisCode};

use crate::evdev::{GenericEvent, KEY_PRESSED, KEY_RELEASED};

/// Default name of the uinput device
pub const DEFAULT_DEVICE_NAME: &str = "Virtual Spotlight Mouse";

/// Keys the virtual device advertises
const OUTPUT_KEYS: &[KeyCode] = &[
    KeyCode::BTN_LEFT,
    KeyCode::BTN_RIGHT,
    KeyCode::KEY_B,
    KeyCode::KEY_E,
    KeyCode::KEY_PAGEUP,
    KeyCode::KEY_PAGEDOWN,
    KeyCode::KEY_ESC,
    KeyCode::KEY_F5,
    KeyCode::KEY_SPACE,
    KeyCode::KEY_TAB,
    KeyCode::KEY_LEFTSHIFT,
    KeyCode::KEY_LEFTALT,
    KeyCode::KEY_LEFTCTRL,
    KeyCode::KEY_VOLUMEUP,
    KeyCode::KEY_VOLUMEDOWN,
    KeyCode::KEY_MUTE,
];

/// Sink for synthetic input
pub trait InputSink: Send + Sync {
    /// Write one batch of events followed by a sync
    fn emit(&self, events: &[GenericEvent]) -> Result<(), OutputError>;

    /// Press and release one key
    fn emit_key(&self, key: KeyCode) -> Result<(), OutputError> {
        self.emit(&[GenericEvent::key(key, KEY_PRESSED)])?;
        self.emit(&[GenericEvent::key(key, KEY_RELEASED)])
    }

    /// Press `keys` in order, then release them in reverse order
    fn emit_chord(&self, keys: &[KeyCode]) -> Result<(), OutputError> {
        let presses: Vec<_> = keys.iter().map(|&k| GenericEvent::key(k, KEY_PRESSED)).collect();
        let releases: Vec<_> = keys
            .iter()
            .rev()
            .map(|&k| GenericEvent::key(k, KEY_RELEASED))
            .collect();
        self.emit(&presses)?;
        self.emit(&releases)
    }

    /// Replay an event received from a physical remote
    fn passthrough(&self, event: &GenericEvent) -> Result<(), OutputError> {
        self.emit(std::slice::from_ref(event))
    }
}

/// uinput-backed sink
pub struct UinputSink {
    device: Mutex<VirtualDevice>,
}

impl UinputSink {
    /// Create the virtual device, advertising `extra_keys` on top of the
    /// defaults
    pub fn create(name: &str, extra_keys: &[KeyCode]) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::<KeyCode>::new();
        for &key in OUTPUT_KEYS.iter().chain(extra_keys) {
            keys.insert(key);
        }

        let mut axes = AttributeSet::<RelativeAxisCode>::new();
        axes.insert(RelativeAxisCode::REL_X);
        axes.insert(RelativeAxisCode::REL_Y);
        axes.insert(RelativeAxisCode::REL_WHEEL);

        let device = VirtualDevice::builder()
            .and_then(|b| b.name(name).with_keys(&keys))
            .and_then(|b| b.with_relative_axes(&axes))
            .and_then(|b| b.build())
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    OutputError::PermissionDenied
                } else {
                    OutputError::IoError(e)
                }
            })?;

        tracing::info!(name, "Virtual output device created");
        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl InputSink for UinputSink {
    fn emit(&self, events: &[GenericEvent]) -> Result<(), OutputError> {
        let raw: Vec<_> = events.iter().map(GenericEvent::to_input_event).collect();
        let mut device = self.device.lock().map_err(|_| OutputError::Poisoned)?;
        device.emit(&raw).map_err(OutputError::IoError)
    }
}

/// Sink used when uinput is unavailable
///
/// Overlay actions keep working; synthetic keys are dropped.
#[derive(Debug, Default)]
pub struct NullSink;

impl InputSink for NullSink {
    fn emit(&self, events: &[GenericEvent]) -> Result<(), OutputError> {
        tracing::debug!(count = events.len(), "No output device, dropping events");
        Ok(())
    }
}

/// Output error type
#[derive(Debug)]
pub enum OutputError {
    /// /dev/uinput not writable
    PermissionDenied,
    /// Lock poisoned by a panicking writer
    Poisoned,
    /// I/O error
    IoError(std::io::Error),
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::PermissionDenied => write!(
                f,
                "Permission denied for /dev/uinput. Ensure udev rules are installed."
            ),
            OutputError::Poisoned => write!(f, "Output device lock poisoned"),
            OutputError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

//! evdev input handling for presentation remotes
//!
//! Most remotes present themselves to the kernel as a keyboard and/or a
//! mouse. Each such event node is opened, grabbed so the desktop does not
//! see the raw keys, and streamed to the owning device runtime as
//! normalized [`GenericEvent`]s. Events the decoder does not consume are
//! replayed through the virtual output device.
//!
//! ## Event values
//! Key events carry `0` (release), `1` (press) or `2` (kernel autorepeat).

use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

use evdev::{Device, EventType, InputEvent, KeyCode, RelativeAxisCode};

/// Key value for a release edge
pub const KEY_RELEASED: i32 = 0;

/// Key value for a press edge
pub const KEY_PRESSED: i32 = 1;

/// Key value for kernel autorepeat
pub const KEY_REPEATED: i32 = 2;

/// Normalized input event: (type, code, value)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericEvent {
    pub event_type: EventType,
    pub code: u16,
    pub value: i32,
}

impl GenericEvent {
    pub fn key(key: KeyCode, value: i32) -> Self {
        Self {
            event_type: EventType::KEY,
            code: key.code(),
            value,
        }
    }

    pub fn relative(axis: RelativeAxisCode, value: i32) -> Self {
        Self {
            event_type: EventType::RELATIVE,
            code: axis.0,
            value,
        }
    }

    /// Key code if this is a key event
    pub fn key_code(&self) -> Option<KeyCode> {
        (self.event_type == EventType::KEY).then(|| KeyCode::new(self.code))
    }

    /// Relative axis if this is a motion event
    pub fn relative_axis(&self) -> Option<RelativeAxisCode> {
        (self.event_type == EventType::RELATIVE).then(|| RelativeAxisCode(self.code))
    }

    pub fn is_relative(&self) -> bool {
        self.event_type == EventType::RELATIVE
    }

    pub fn to_input_event(&self) -> InputEvent {
        InputEvent::new(self.event_type.0, self.code, self.value)
    }
}

impl From<&InputEvent> for GenericEvent {
    fn from(event: &InputEvent) -> Self {
        Self {
            event_type: event.event_type(),
            code: event.code(),
            value: event.value(),
        }
    }
}

/// Open an event node, mapping the error kinds the daemon cares about
pub fn open_device(path: &Path) -> Result<Device, EvdevError> {
    Device::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => {
            tracing::error!(
                path = %path.display(),
                "Permission denied. Ensure udev rules are installed and user is in 'input' group."
            );
            EvdevError::PermissionDenied(path.to_path_buf())
        }
        io::ErrorKind::NotFound => EvdevError::DeviceGone(path.to_path_buf()),
        _ if e.raw_os_error() == Some(libc::ENODEV) => EvdevError::DeviceGone(path.to_path_buf()),
        _ => EvdevError::IoError(e),
    })
}

/// Streams key and motion events from one event node
pub struct EventReader {
    path: PathBuf,
}

impl EventReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forward key and relative events until stopped or the node goes away
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<GenericEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), EvdevError> {
        if *stop.borrow() {
            return Ok(());
        }

        let mut device = open_device(&self.path)?;
        if let Err(e) = device.grab() {
            tracing::warn!(path = %self.path.display(), error = %e, "Could not grab event node");
        }

        tracing::info!(
            path = %self.path.display(),
            name = device.name().unwrap_or("Unknown"),
            "Listening for input events"
        );

        let mut stream = device.into_event_stream().map_err(EvdevError::IoError)?;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                next = stream.next_event() => match next {
                    Ok(event) => {
                        let event_type = event.event_type();
                        if event_type != EventType::KEY && event_type != EventType::RELATIVE {
                            continue;
                        }
                        if events.send(GenericEvent::from(&event)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                        return Err(EvdevError::DeviceGone(self.path.clone()));
                    }
                    Err(e) => {
                        tracing::error!(path = %self.path.display(), "Error reading event: {:?}", e);
                        return Err(EvdevError::IoError(e));
                    }
                },
            }
        }

        tracing::debug!(path = %self.path.display(), "Event reader stopped");
        Ok(())
    }
}

/// evdev error type
#[derive(Debug)]
pub enum EvdevError {
    /// Permission denied opening the node
    PermissionDenied(PathBuf),
    /// Node disappeared
    DeviceGone(PathBuf),
    /// I/O error
    IoError(std::io::Error),
}

impl std::fmt::Display for EvdevError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvdevError::PermissionDenied(path) => write!(
                f,
                "Permission denied for {}. Ensure udev rules are installed and user is in 'input' group.",
                path.display()
            ),
            EvdevError::DeviceGone(path) => write!(f, "Device {} is gone", path.display()),
            EvdevError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for EvdevError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvdevError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_event_accessors() {
        let ev = GenericEvent::key(KeyCode::KEY_PAGEDOWN, KEY_PRESSED);
        assert_eq!(ev.key_code(), Some(KeyCode::KEY_PAGEDOWN));
        assert_eq!(ev.relative_axis(), None);
        assert!(!ev.is_relative());
    }

    #[test]
    fn test_relative_event_accessors() {
        let ev = GenericEvent::relative(RelativeAxisCode::REL_Y, -4);
        assert_eq!(ev.relative_axis(), Some(RelativeAxisCode::REL_Y));
        assert_eq!(ev.key_code(), None);
        assert!(ev.is_relative());
    }

    #[test]
    fn test_input_event_conversion() {
        let ev = GenericEvent::key(KeyCode::KEY_B, KEY_RELEASED);
        let raw = ev.to_input_event();
        assert_eq!(raw.event_type(), EventType::KEY);
        assert_eq!(raw.code(), KeyCode::KEY_B.code());
        assert_eq!(GenericEvent::from(&raw), ev);
    }

    #[test]
    fn test_open_missing_node_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_device(&dir.path().join("event42")).unwrap_err();
        assert!(matches!(err, EvdevError::DeviceGone(_)));
    }

    #[tokio::test]
    async fn test_stopped_reader_returns_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(true);
        let reader = EventReader::new("/nonexistent/event0");
        assert!(reader.run(tx, stop_rx).await.is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = EvdevError::DeviceGone(PathBuf::from("/dev/input/event3"));
        assert_eq!(err.to_string(), "Device /dev/input/event3 is gone");
    }
}

//! Shared application context
//!
//! One [`AppContext`] is created at startup and handed to the registry,
//! every device runtime and the D-Bus service. It owns the overlay surface,
//! the virtual output device and the active-device slot.

use std::sync::{Arc, RwLock};

use evdev::KeyCode;

use crate::device_class::DeviceKind;
use crate::mode::Mode;
use crate::output::InputSink;
use crate::overlay::Overlay;

#[derive(Debug, Default)]
struct Session {
    active: Option<DeviceKind>,
    compatible_modes: Vec<Mode>,
}

pub struct AppContext {
    overlay: Arc<dyn Overlay>,
    output: Arc<dyn InputSink>,
    session: RwLock<Session>,
    presentation_chord: Vec<KeyCode>,
}

impl AppContext {
    pub fn new(overlay: Arc<dyn Overlay>, output: Arc<dyn InputSink>, presentation_chord: &[u16]) -> Self {
        Self {
            overlay,
            output,
            session: RwLock::new(Session::default()),
            presentation_chord: presentation_chord.iter().map(|&c| KeyCode::new(c)).collect(),
        }
    }

    pub fn overlay(&self) -> &dyn Overlay {
        self.overlay.as_ref()
    }

    pub fn output(&self) -> &dyn InputSink {
        self.output.as_ref()
    }

    /// Keys that start a slideshow
    pub fn presentation_chord(&self) -> &[KeyCode] {
        &self.presentation_chord
    }

    /// Device whose input is currently dispatched
    pub fn active(&self) -> Option<DeviceKind> {
        self.read(|s| s.active)
    }

    pub fn is_active(&self, kind: DeviceKind) -> bool {
        self.active() == Some(kind)
    }

    pub fn compatible_modes(&self) -> Vec<Mode> {
        self.read(|s| s.compatible_modes.clone())
    }

    /// Empty the active slot; nothing dispatches until [`activate`](Self::activate)
    pub fn deactivate(&self) -> Option<DeviceKind> {
        self.write(|s| s.active.take())
    }

    /// Mark `kind` active and publish its capabilities to the overlay
    pub fn activate(&self, kind: DeviceKind) {
        let class = kind.class();
        self.write(|s| {
            s.compatible_modes = class.compatible_modes.to_vec();
        });
        self.overlay
            .set_compatible_modes(class.compatible_modes, class.supports_auto_mode);
        self.write(|s| s.active = Some(kind));
        tracing::info!(device = %kind, "Active device changed");
    }

    fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        match self.session.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        match self.session.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::OverlayDefaults;
    use crate::output::testing::RecordingSink;
    use crate::overlay::OverlayController;

    /// Context wired to an in-memory overlay and a recording sink
    pub struct TestContext {
        pub ctx: Arc<AppContext>,
        pub overlay: Arc<OverlayController>,
        pub sink: Arc<RecordingSink>,
    }

    impl TestContext {
        pub fn new() -> Self {
            let overlay = Arc::new(OverlayController::new(&OverlayDefaults::default()));
            let sink = Arc::new(RecordingSink::default());
            let ctx = Arc::new(AppContext::new(overlay.clone(), sink.clone(), &[42, 63]));
            Self { ctx, overlay, sink }
        }

        /// Context with `kind` already active
        pub fn active(kind: DeviceKind) -> Self {
            let t = Self::new();
            t.ctx.activate(kind);
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestContext;
    use super::*;

    #[test]
    fn test_activate_publishes_modes() {
        let t = TestContext::new();
        assert_eq!(t.ctx.active(), None);

        t.ctx.activate(DeviceKind::GenericVrBox);
        assert!(t.ctx.is_active(DeviceKind::GenericVrBox));
        assert!(!t.ctx.compatible_modes().contains(&Mode::Pen));
        assert_eq!(t.overlay.compatible_modes(), t.ctx.compatible_modes());
    }

    #[test]
    fn test_deactivate_clears_slot() {
        let t = TestContext::active(DeviceKind::AsaComposite);
        assert_eq!(t.ctx.deactivate(), Some(DeviceKind::AsaComposite));
        assert_eq!(t.ctx.active(), None);
        assert_eq!(t.ctx.deactivate(), None);
    }

    #[test]
    fn test_presentation_chord_codes() {
        let t = TestContext::new();
        assert_eq!(
            t.ctx.presentation_chord(),
            &[KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_F5]
        );
    }
}

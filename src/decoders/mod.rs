//! Per-device protocol decoders
//!
//! A decoder turns raw reports and generic input events of one device
//! family into button edges or ready-made action tokens, and maps each
//! resolved token to overlay actions or synthetic keys for the current mode.
//!
//! [`Driver`] pairs a decoder with a [`GestureMachine`] and is the only
//! thing a device runtime talks to. Everything it does happens on the
//! runtime's actor task, so decoders are plain `&mut self` state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use evdev::KeyCode;

use crate::context::AppContext;
use crate::device_class::DeviceKind;
use crate::evdev::{GenericEvent, KEY_PRESSED, KEY_RELEASED};
use crate::gesture::{ActionToken, Button, GestureConfig, GestureMachine};
use crate::mode::Mode;
use crate::output::OutputError;
use crate::overlay::Overlay;

pub mod asa_composite;
pub mod asa_smart;
pub mod baseus;
pub mod vrbox;

pub use asa_composite::AsaCompositeDecoder;
pub use asa_smart::AsaSmartDecoder;
pub use baseus::BaseusDecoder;
pub use vrbox::VrBoxDecoder;

/// Idle time after which auto mode hides the overlay
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Minimum spacing between auto-mode "show" actions
pub const MOVE_RATE_LIMIT: Duration = Duration::from_millis(1200);

/// Motion is held back this long after a left-button press
pub const CLICK_SETTLE: Duration = Duration::from_millis(1500);

/// Output of a decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<B> {
    /// Press edge, fed to the gesture machine
    Press(B),
    /// Release edge, fed to the gesture machine
    Release(B),
    /// Token the device resolved itself
    Token(ActionToken<B>),
}

/// Everything a dispatch step may touch
pub struct DispatchCx<'a> {
    pub ctx: &'a AppContext,
    pub now: Instant,
}

impl<'a> DispatchCx<'a> {
    pub fn new(ctx: &'a AppContext, now: Instant) -> Self {
        Self { ctx, now }
    }

    pub fn overlay(&self) -> &dyn Overlay {
        self.ctx.overlay()
    }

    pub fn mode(&self) -> Mode {
        self.ctx.overlay().mode()
    }

    pub fn visible(&self) -> bool {
        self.ctx.overlay().is_visible()
    }

    /// Overlay is not capturing input
    pub fn normal_mode(&self) -> bool {
        self.mode() == Mode::Mouse || !self.visible()
    }

    pub fn key(&self, key: KeyCode) -> Result<(), ActionError> {
        self.ctx.output().emit_key(key).map_err(ActionError::from)
    }

    pub fn chord(&self, keys: &[KeyCode]) -> Result<(), ActionError> {
        self.ctx.output().emit_chord(keys).map_err(ActionError::from)
    }

    pub fn passthrough(&self, event: &GenericEvent) -> Result<(), ActionError> {
        self.ctx.output().passthrough(event).map_err(ActionError::from)
    }

    pub fn alt_tab(&self) -> Result<(), ActionError> {
        self.chord(&[KeyCode::KEY_LEFTALT, KeyCode::KEY_TAB])
    }

    pub fn start_presentation(&self) -> Result<(), ActionError> {
        self.chord(self.ctx.presentation_chord())
    }

    pub fn toggle_auto_mode(&self) {
        let overlay = self.overlay();
        overlay.set_auto_mode(!overlay.auto_mode_enabled());
    }
}

/// Device family protocol
pub trait Decoder: Send + 'static {
    type Button: Button;

    /// Decode one framed raw report
    fn decode_report(&mut self, _report: &[u8], _out: &mut Vec<Signal<Self::Button>>) {}

    /// Decode one generic event; may pass it through directly
    fn decode_event(
        &mut self,
        event: &GenericEvent,
        cx: &DispatchCx<'_>,
        out: &mut Vec<Signal<Self::Button>>,
    ) -> Result<(), ActionError>;

    /// Perform the effect of a resolved token
    fn dispatch(&mut self, token: ActionToken<Self::Button>, cx: &DispatchCx<'_>) -> Result<(), ActionError>;

    /// Decoder-local timer, if any
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn poll(&mut self, _now: Instant, _out: &mut Vec<Signal<Self::Button>>) {}
}

/// Object-safe face of a [`Driver`]
pub trait DeviceDriver: Send {
    fn kind(&self) -> DeviceKind;
    fn handle_report(&mut self, report: &[u8], now: Instant);
    fn handle_event(&mut self, event: &GenericEvent, now: Instant);
    fn handle_deadline(&mut self, now: Instant);
    fn next_deadline(&self) -> Option<Instant>;
}

/// Decoder plus gesture machine for one device
pub struct Driver<D: Decoder> {
    kind: DeviceKind,
    ctx: Arc<AppContext>,
    decoder: D,
    machine: GestureMachine<D::Button>,
    signals: Vec<Signal<D::Button>>,
}

impl<D: Decoder> Driver<D> {
    pub fn new(kind: DeviceKind, ctx: Arc<AppContext>, decoder: D, gestures: GestureConfig) -> Self {
        Self {
            kind,
            ctx,
            decoder,
            machine: GestureMachine::new(gestures),
            signals: Vec::new(),
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn is_active(&self) -> bool {
        self.ctx.is_active(self.kind)
    }

    /// Fire deadlines that came due before an input arrived
    fn catch_up(&mut self, now: Instant) {
        if self.next_deadline().map_or(false, |at| at <= now) {
            self.handle_deadline(now);
        }
    }

    fn drain(&mut self, cx: &DispatchCx<'_>) {
        let mut signals = std::mem::take(&mut self.signals);
        for signal in signals.drain(..) {
            match signal {
                Signal::Press(button) => self.machine.press(button, cx.now),
                Signal::Release(button) => {
                    for token in self.machine.release(button, cx.now) {
                        self.dispatch(token, cx);
                    }
                }
                Signal::Token(token) => self.dispatch(token, cx),
            }
        }
        self.signals = signals;
    }

    fn dispatch(&mut self, token: ActionToken<D::Button>, cx: &DispatchCx<'_>) {
        if !self.is_active() {
            tracing::debug!(device = %self.kind, %token, "Dropping action from inactive device");
            return;
        }
        tracing::debug!(device = %self.kind, %token, mode = %cx.mode(), "Action");
        if let Err(e) = self.decoder.dispatch(token, cx) {
            tracing::warn!(device = %self.kind, %token, error = %e, "Action failed");
        }
    }
}

impl<D: Decoder> DeviceDriver for Driver<D> {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn handle_report(&mut self, report: &[u8], now: Instant) {
        if !self.is_active() {
            return;
        }
        self.catch_up(now);
        let ctx = Arc::clone(&self.ctx);
        let cx = DispatchCx::new(&ctx, now);
        self.decoder.decode_report(report, &mut self.signals);
        self.drain(&cx);
    }

    fn handle_event(&mut self, event: &GenericEvent, now: Instant) {
        if !self.is_active() {
            return;
        }
        self.catch_up(now);
        let ctx = Arc::clone(&self.ctx);
        let cx = DispatchCx::new(&ctx, now);
        if let Err(e) = self.decoder.decode_event(event, &cx, &mut self.signals) {
            tracing::warn!(device = %self.kind, error = %e, "Event handling failed");
        }
        self.drain(&cx);
    }

    fn handle_deadline(&mut self, now: Instant) {
        let ctx = Arc::clone(&self.ctx);
        let cx = DispatchCx::new(&ctx, now);
        for token in self.machine.poll(now) {
            self.dispatch(token, &cx);
        }
        self.decoder.poll(now, &mut self.signals);
        self.drain(&cx);
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.machine.next_deadline(), self.decoder.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Build the driver for `kind`; the virtual pointer has none
pub fn new_driver(
    kind: DeviceKind,
    ctx: Arc<AppContext>,
    gestures: GestureConfig,
) -> Option<Box<dyn DeviceDriver>> {
    let driver: Box<dyn DeviceDriver> = match kind {
        DeviceKind::BaseusOrangeDotAi => Box::new(Driver::new(kind, ctx, BaseusDecoder::default(), gestures)),
        DeviceKind::GenericVrBox => Box::new(Driver::new(kind, ctx, VrBoxDecoder::default(), gestures)),
        DeviceKind::AsaSmartControl => Box::new(Driver::new(kind, ctx, AsaSmartDecoder::default(), gestures)),
        DeviceKind::AsaComposite => Box::new(Driver::new(kind, ctx, AsaCompositeDecoder::default(), gestures)),
        DeviceKind::Virtual => return None,
    };
    Some(driver)
}

// ============================================================================
// Shared decoder state
// ============================================================================

/// Button a raw protocol currently reports as down
///
/// Raw reports carry a level, not edges. Edges are derived here.
#[derive(Debug)]
pub(crate) struct HeldButton<B> {
    current: Option<B>,
}

impl<B> Default for HeldButton<B> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<B: Button> HeldButton<B> {
    pub fn press(&mut self, button: B, out: &mut Vec<Signal<B>>) {
        match self.current {
            Some(current) if current == button => return,
            Some(current) => out.push(Signal::Release(current)),
            None => {}
        }
        self.current = Some(button);
        out.push(Signal::Press(button));
    }

    pub fn release(&mut self, out: &mut Vec<Signal<B>>) {
        if let Some(current) = self.current.take() {
            out.push(Signal::Release(current));
        }
    }

    pub fn release_if(&mut self, button: B, out: &mut Vec<Signal<B>>) {
        if self.current == Some(button) {
            self.release(out);
        }
    }
}

/// Allows an action at most once per period
#[derive(Debug)]
pub(crate) struct RateLimit {
    period: Duration,
    last: Option<Instant>,
}

impl RateLimit {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) <= self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Alternates between starting a slideshow and leaving it
///
/// The default starts with the presentation chord.
#[derive(Debug, Default)]
pub(crate) struct PresentationToggle {
    presenting: bool,
}

impl PresentationToggle {
    /// First toggle sends ESC
    pub fn esc_first() -> Self {
        Self { presenting: true }
    }

    pub fn toggle(&mut self, cx: &DispatchCx<'_>) -> Result<(), ActionError> {
        if self.presenting {
            cx.key(KeyCode::KEY_ESC)?;
        } else {
            cx.start_presentation()?;
        }
        self.presenting = !self.presenting;
        Ok(())
    }
}

/// Pointer bookkeeping of the ASA remotes
///
/// Tracks the left button, holds motion back right after a click, and runs
/// the auto-mode idle timer.
#[derive(Debug)]
pub(crate) struct PointerGate {
    mouse_down: bool,
    mouse_down_at: Option<Instant>,
    idle_at: Option<Instant>,
    move_limit: RateLimit,
}

impl Default for PointerGate {
    fn default() -> Self {
        Self {
            mouse_down: false,
            mouse_down_at: None,
            idle_at: None,
            move_limit: RateLimit::new(MOVE_RATE_LIMIT),
        }
    }
}

impl PointerGate {
    pub fn is_mouse_down(&self) -> bool {
        self.mouse_down
    }

    /// Restart the idle timer
    pub fn touch(&mut self, now: Instant) {
        self.idle_at = Some(now + IDLE_TIMEOUT);
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_at
    }

    /// Whether the idle timer expired; clears it when it did
    pub fn take_idle(&mut self, now: Instant) -> bool {
        match self.idle_at {
            Some(at) if at <= now => {
                self.idle_at = None;
                true
            }
            _ => false,
        }
    }

    /// Left-button handling shared by both ASA remotes
    ///
    /// Returns `true` when the event should be passed through.
    pub fn left_button(&mut self, event: &GenericEvent, mode: Mode, now: Instant) -> bool {
        if matches!(mode, Mode::Mouse | Mode::Pen) {
            return true;
        }
        match event.value {
            KEY_PRESSED => {
                self.mouse_down = true;
                self.mouse_down_at = Some(now);
            }
            KEY_RELEASED => self.mouse_down = false,
            _ => {}
        }
        false
    }

    /// Motion is not being held back by a recent click
    pub fn settled(&self, now: Instant) -> bool {
        self.mouse_down_at
            .map_or(true, |at| now.saturating_duration_since(at) > CLICK_SETTLE)
    }

    /// Auto mode: show the overlay on movement, rate limited
    pub fn on_move(&mut self, cx: &DispatchCx<'_>) {
        let overlay = cx.overlay();
        if overlay.auto_mode_enabled() && !overlay.is_visible() && self.move_limit.ready(cx.now) {
            overlay.show_overlay();
        }
    }

    /// Auto mode: hide the overlay once the pointer rests
    pub fn on_stop(&mut self, cx: &DispatchCx<'_>) {
        let overlay = cx.overlay();
        if overlay.auto_mode_enabled() && overlay.is_visible() {
            overlay.hide_overlay();
        }
    }
}

/// Failure while performing an action
#[derive(Debug)]
pub enum ActionError {
    /// Synthetic input could not be written
    Output(OutputError),
}

impl From<OutputError> for ActionError {
    fn from(e: OutputError) -> Self {
        ActionError::Output(e)
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Output(e) => write!(f, "Output error: {}", e),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::Output(e) => Some(e),
        }
    }
}

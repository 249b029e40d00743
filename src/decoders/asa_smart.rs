//! ASA "Smart Control" air mouse presenter
//!
//! Buttons come in as fixed 8-byte reports on the vendor hidraw interface;
//! the first four bytes identify the button and an all-zero prefix means
//! nothing is held. A few prefixes are gestures the remote resolved itself.
//!
//! Pointer motion arrives on the mouse event node. With the left button
//! held, motion is read as a swipe instead of moving the pointer.

use std::fmt;
use std::time::Instant;

use evdev::{KeyCode, RelativeAxisCode};

use super::{ActionError, Decoder, DispatchCx, HeldButton, PointerGate, RateLimit, Signal, MOVE_RATE_LIMIT};
use crate::evdev::GenericEvent;
use crate::gesture::{ActionToken, Axis, Button, Gesture, MotionDirection, MotionGestureBuffer};
use crate::mode::Mode;

const REPORT_LEN: usize = 8;
const PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmartButton {
    Prev,
    Next,
    Highlight,
    Black,
    Esc,
    Tab,
    Start,
    SwipeUp,
    SwipeDown,
    SwipeLeft,
    SwipeRight,
    MouseMove,
    MouseStop,
}

impl fmt::Display for SmartButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SmartButton::Prev => "PREV",
            SmartButton::Next => "NEXT",
            SmartButton::Highlight => "HGL",
            SmartButton::Black => "BLACK",
            SmartButton::Esc => "ESC",
            SmartButton::Tab => "TAB",
            SmartButton::Start => "START",
            SmartButton::SwipeUp => "G_UP",
            SmartButton::SwipeDown => "G_DOWN",
            SmartButton::SwipeLeft => "G_LEFT",
            SmartButton::SwipeRight => "G_RIGHT",
            SmartButton::MouseMove => "MOUSE_MOVE",
            SmartButton::MouseStop => "MOUSE_STOP",
        })
    }
}

impl Button for SmartButton {}

enum Report {
    Idle,
    Button(SmartButton),
    Direct(ActionToken<SmartButton>),
    Unknown,
}

fn classify(prefix: [u8; PREFIX_LEN]) -> Report {
    use SmartButton::*;

    let direct = |button, gesture| Report::Direct(ActionToken::new(button, gesture));
    match prefix {
        [0, 0, 0, 0] => Report::Idle,
        [0, 0, 75, 0] => Report::Button(Prev),
        [0, 0, 78, 0] => Report::Button(Next),
        [0, 0, 8, 0] => Report::Button(Highlight),
        [0, 0, 5, 0] => Report::Button(Black),
        [0, 0, 0, 41] => Report::Button(Esc),
        [0, 0, 0, 43] => Report::Button(Tab),
        [2, 0, 0, 62] => Report::Button(Start),
        [0, 0, 0, 40] => direct(Tab, Gesture::Double),
        [4, 0, 0, 43] => direct(Tab, Gesture::Repeat),
        [1, 0, 0, 19] => direct(Highlight, Gesture::Hold),
        [1, 0, 0, 4] => direct(Highlight, Gesture::Release),
        _ => Report::Unknown,
    }
}

impl From<MotionDirection> for SmartButton {
    fn from(direction: MotionDirection) -> Self {
        match direction {
            MotionDirection::Up => SmartButton::SwipeUp,
            MotionDirection::Down => SmartButton::SwipeDown,
            MotionDirection::Left => SmartButton::SwipeLeft,
            MotionDirection::Right => SmartButton::SwipeRight,
        }
    }
}

#[derive(Debug)]
pub struct AsaSmartDecoder {
    held: HeldButton<SmartButton>,
    last_direct: Option<[u8; PREFIX_LEN]>,
    pointer: PointerGate,
    motion: MotionGestureBuffer,
    shade_limit: RateLimit,
}

impl Default for AsaSmartDecoder {
    fn default() -> Self {
        Self {
            held: HeldButton::default(),
            last_direct: None,
            pointer: PointerGate::default(),
            motion: MotionGestureBuffer::default(),
            shade_limit: RateLimit::new(MOVE_RATE_LIMIT),
        }
    }
}

impl AsaSmartDecoder {
    /// Swipe left/right in spotlight mode cycles the shade, rate limited
    fn shade_step(&mut self, cx: &DispatchCx<'_>, step: i32) {
        if self.shade_limit.ready(cx.now) {
            cx.overlay().next_shade_color(step);
        }
    }
}

impl Decoder for AsaSmartDecoder {
    type Button = SmartButton;

    fn decode_report(&mut self, report: &[u8], out: &mut Vec<Signal<SmartButton>>) {
        if report.len() != REPORT_LEN {
            tracing::trace!(len = report.len(), "Dropping malformed ASA report");
            return;
        }
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&report[..PREFIX_LEN]);

        match classify(prefix) {
            Report::Idle => {
                self.last_direct = None;
                self.held.release(out);
            }
            Report::Button(button) => self.held.press(button, out),
            Report::Direct(token) => {
                if self.last_direct != Some(prefix) {
                    self.last_direct = Some(prefix);
                    out.push(Signal::Token(token));
                }
            }
            Report::Unknown => {
                tracing::debug!(?prefix, "Unknown ASA report");
                self.held.release(out);
            }
        }
    }

    fn decode_event(
        &mut self,
        event: &GenericEvent,
        cx: &DispatchCx<'_>,
        out: &mut Vec<Signal<SmartButton>>,
    ) -> Result<(), ActionError> {
        let now = cx.now;

        if let Some(axis) = event.relative_axis() {
            self.pointer.touch(now);
            if self.pointer.is_mouse_down() {
                let axis = match axis {
                    RelativeAxisCode::REL_X => Axis::X,
                    RelativeAxisCode::REL_Y => Axis::Y,
                    _ => return Ok(()),
                };
                if cx.overlay().is_drawing() {
                    return cx.passthrough(event);
                }
                if let Some(direction) = self.motion.push(axis, event.value) {
                    out.push(Signal::Token(ActionToken::click(direction.into())));
                }
            } else if self.pointer.settled(now) {
                cx.passthrough(event)?;
                out.push(Signal::Token(ActionToken::click(SmartButton::MouseMove)));
            }
            return Ok(());
        }

        if let Some(key) = event.key_code() {
            self.pointer.touch(now);
            if key == KeyCode::BTN_LEFT {
                if self.pointer.left_button(event, cx.mode(), now) {
                    cx.passthrough(event)?;
                }
                if !self.pointer.is_mouse_down() {
                    self.motion.clear();
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, token: ActionToken<SmartButton>, cx: &DispatchCx<'_>) -> Result<(), ActionError> {
        use Gesture::*;
        use SmartButton as S;

        let overlay = cx.overlay();
        let mode = cx.mode();
        let visible = cx.visible();
        let normal = cx.normal_mode();

        match (token.button, token.gesture) {
            (S::Tab, Click) => overlay.switch_mode(1),
            (S::Tab, Repeat) => cx.alt_tab()?,
            (S::Tab, Double) => cx.toggle_auto_mode(),

            (S::MouseMove, _) => self.pointer.on_move(cx),
            (S::MouseStop, _) => self.pointer.on_stop(cx),

            (S::Prev, Click) => match mode {
                Mode::Pen => overlay.next_pen_color(-1),
                Mode::Laser => overlay.next_laser_color(-1),
                Mode::Spotlight => overlay.next_shade_color(-1),
                Mode::MagnifyGlass => overlay.zoom(1),
                Mode::Mouse => cx.key(KeyCode::KEY_PAGEUP)?,
            },
            (S::Next, Click) => match mode {
                Mode::Pen => overlay.next_pen_color(1),
                Mode::Laser => overlay.next_laser_color(1),
                Mode::Spotlight => overlay.next_shade_color(1),
                Mode::MagnifyGlass => overlay.zoom(-1),
                Mode::Mouse => cx.key(KeyCode::KEY_PAGEDOWN)?,
            },
            (S::Prev, Double) => overlay.switch_mode(-1),
            (S::Next, Double) => overlay.switch_mode(1),

            (S::SwipeUp, _) if visible => match mode {
                Mode::Laser => overlay.change_laser_size(1),
                Mode::Spotlight | Mode::MagnifyGlass => overlay.change_spot_radius(2),
                _ => {}
            },
            (S::SwipeDown, _) if visible => match mode {
                Mode::Laser => overlay.change_laser_size(-1),
                Mode::Spotlight | Mode::MagnifyGlass => overlay.change_spot_radius(-2),
                _ => {}
            },
            (S::SwipeLeft, _) if visible => match mode {
                Mode::MagnifyGlass => overlay.zoom(-1),
                Mode::Laser => overlay.next_laser_color(1),
                Mode::Spotlight => self.shade_step(cx, -1),
                _ => {}
            },
            (S::SwipeRight, _) if visible => match mode {
                Mode::MagnifyGlass => overlay.zoom(1),
                Mode::Laser => overlay.next_laser_color(-1),
                Mode::Spotlight => self.shade_step(cx, 1),
                _ => {}
            },

            (S::Highlight, Click) => {
                if mode == Mode::Pen {
                    overlay.clear_drawing(false);
                }
            }
            (S::Highlight, Hold) => {
                if mode == Mode::Pen {
                    overlay.clear_drawing(true);
                }
            }
            (S::Highlight, Release) => overlay.finish_pen_path(),

            (S::Esc, Click) => {
                if normal {
                    cx.key(KeyCode::KEY_ESC)?;
                }
            }
            (S::Start, Click) => {
                if normal {
                    cx.start_presentation()?;
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pointer.idle_deadline()
    }

    fn poll(&mut self, now: Instant, out: &mut Vec<Signal<SmartButton>>) {
        if self.pointer.take_idle(now) {
            out.push(Signal::Token(ActionToken::click(SmartButton::MouseStop)));
        }
    }
}

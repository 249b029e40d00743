//! Generic "VR BOX" Bluetooth remote
//!
//! Shows up as a gamepad/keyboard combo. Depending on the switch on the
//! back it reports gamepad buttons or media keys, so each logical button
//! has several key codes.

use std::fmt;

use evdev::KeyCode;

use super::{ActionError, Decoder, DispatchCx, Signal};
use crate::evdev::{GenericEvent, KEY_PRESSED, KEY_RELEASED};
use crate::gesture::{ActionToken, Button, Gesture};
use crate::mode::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VrButton {
    G1,
    G2,
    A,
    B,
    C,
    D,
    SL,
    SR,
}

impl fmt::Display for VrButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Button for VrButton {
    fn hold_label(self) -> &'static str {
        "long"
    }
}

fn button_for(key: KeyCode) -> Option<VrButton> {
    let button = match key {
        KeyCode::BTN_LEFT | KeyCode::BTN_TL => VrButton::G1,
        KeyCode::BTN_RIGHT | KeyCode::BTN_TR => VrButton::G2,
        KeyCode::BTN_SOUTH | KeyCode::KEY_PLAYPAUSE | KeyCode::BTN_TR2 => VrButton::A,
        KeyCode::BTN_EAST | KeyCode::BTN_NORTH => VrButton::B,
        KeyCode::KEY_VOLUMEUP | KeyCode::BTN_TL2 => VrButton::C,
        KeyCode::KEY_VOLUMEDOWN | KeyCode::BTN_WEST => VrButton::D,
        KeyCode::KEY_NEXTSONG => VrButton::SL,
        KeyCode::KEY_PREVIOUSSONG => VrButton::SR,
        _ => return None,
    };
    Some(button)
}

#[derive(Debug, Default)]
pub struct VrBoxDecoder;

impl Decoder for VrBoxDecoder {
    type Button = VrButton;

    fn decode_event(
        &mut self,
        event: &GenericEvent,
        cx: &DispatchCx<'_>,
        out: &mut Vec<Signal<VrButton>>,
    ) -> Result<(), ActionError> {
        if event.is_relative() {
            return cx.passthrough(event);
        }
        let key = match event.key_code() {
            Some(key) => key,
            None => return Ok(()),
        };
        let button = match button_for(key) {
            Some(button) => button,
            None => {
                tracing::debug!(code = key.code(), "Unmapped VR box key");
                return Ok(());
            }
        };
        match event.value {
            KEY_PRESSED => out.push(Signal::Press(button)),
            KEY_RELEASED => out.push(Signal::Release(button)),
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, token: ActionToken<VrButton>, cx: &DispatchCx<'_>) -> Result<(), ActionError> {
        use Gesture::*;

        let overlay = cx.overlay();
        let mode = cx.mode();

        match (token.button, token.gesture) {
            (VrButton::G1, Click) => match mode {
                Mode::Mouse => cx.key(KeyCode::KEY_PAGEDOWN)?,
                Mode::Laser => overlay.next_laser_color(1),
                _ => {}
            },
            (VrButton::G1, Double) => {
                if mode == Mode::Laser {
                    overlay.next_laser_color(1);
                }
            }
            (VrButton::G1, Hold) => cx.chord(&[KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_F5])?,
            (VrButton::G1, Repeat) => match mode {
                Mode::Spotlight => overlay.change_spot_radius(1),
                Mode::Laser => overlay.change_laser_size(1),
                _ => {}
            },

            (VrButton::G2, Click) => match mode {
                Mode::Mouse => cx.key(KeyCode::KEY_PAGEUP)?,
                Mode::Laser => overlay.next_laser_color(-1),
                _ => {}
            },
            (VrButton::G2, Double) => {
                if mode == Mode::Laser {
                    overlay.next_laser_color(1);
                }
            }
            (VrButton::G2, Hold) => {
                if mode != Mode::Mouse {
                    overlay.set_mode(Mode::Mouse);
                }
            }
            (VrButton::G2, Repeat) => match mode {
                Mode::Spotlight => overlay.change_spot_radius(-1),
                Mode::Laser => overlay.change_laser_size(-1),
                _ => {}
            },

            (VrButton::B, Click) => {
                if mode == Mode::Mouse {
                    cx.key(KeyCode::KEY_B)?;
                }
            }
            (VrButton::B, Hold) => {
                overlay.set_mode(Mode::Laser);
            }

            (VrButton::C, Click) => overlay.switch_mode(1),
            (VrButton::C, Double) => overlay.switch_mode(-1),
            (VrButton::C, Hold) => {
                overlay.set_mode(Mode::Spotlight);
            }

            _ => {}
        }
        Ok(())
    }
}

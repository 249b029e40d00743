//! ASA composite presenter
//!
//! Keyboard plus mouse, no vendor interface. The kernel already reports
//! press, autorepeat and release per key, so those map straight onto
//! click, repeat and release tokens without a gesture machine.

use std::fmt;
use std::time::Instant;

use evdev::KeyCode;

use super::{ActionError, Decoder, DispatchCx, PointerGate, PresentationToggle, Signal};
use crate::evdev::{GenericEvent, KEY_PRESSED, KEY_RELEASED, KEY_REPEATED};
use crate::gesture::{ActionToken, Button, Gesture};
use crate::mode::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeButton {
    Compose,
    HomePage,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    PlayPause,
    Backspace,
    MouseMove,
    MouseStop,
}

impl fmt::Display for CompositeButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompositeButton::Compose => "KEY_COMPOSE",
            CompositeButton::HomePage => "KEY_HOMEPAGE",
            CompositeButton::PageUp => "KEY_PAGEUP",
            CompositeButton::PageDown => "KEY_PAGEDOWN",
            CompositeButton::Up => "KEY_UP",
            CompositeButton::Down => "KEY_DOWN",
            CompositeButton::Left => "KEY_LEFT",
            CompositeButton::Right => "KEY_RIGHT",
            CompositeButton::PlayPause => "KEY_PLAYPAUSE",
            CompositeButton::Backspace => "KEY_BACKSPACE",
            CompositeButton::MouseMove => "MOUSE_MOVE",
            CompositeButton::MouseStop => "MOUSE_STOP",
        })
    }
}

impl Button for CompositeButton {}

fn button_for(key: KeyCode) -> Option<CompositeButton> {
    let button = match key {
        KeyCode::KEY_COMPOSE => CompositeButton::Compose,
        KeyCode::KEY_HOMEPAGE => CompositeButton::HomePage,
        KeyCode::KEY_PAGEUP => CompositeButton::PageUp,
        KeyCode::KEY_PAGEDOWN => CompositeButton::PageDown,
        KeyCode::KEY_UP => CompositeButton::Up,
        KeyCode::KEY_DOWN => CompositeButton::Down,
        KeyCode::KEY_LEFT => CompositeButton::Left,
        KeyCode::KEY_RIGHT => CompositeButton::Right,
        KeyCode::KEY_PLAYPAUSE => CompositeButton::PlayPause,
        KeyCode::KEY_BACKSPACE => CompositeButton::Backspace,
        _ => return None,
    };
    Some(button)
}

#[derive(Debug, Default)]
pub struct AsaCompositeDecoder {
    pointer: PointerGate,
    presentation: PresentationToggle,
}

impl Decoder for AsaCompositeDecoder {
    type Button = CompositeButton;

    fn decode_event(
        &mut self,
        event: &GenericEvent,
        cx: &DispatchCx<'_>,
        out: &mut Vec<Signal<CompositeButton>>,
    ) -> Result<(), ActionError> {
        let now = cx.now;

        if event.is_relative() {
            self.pointer.touch(now);
            if self.pointer.settled(now) {
                cx.passthrough(event)?;
                out.push(Signal::Token(ActionToken::click(CompositeButton::MouseMove)));
            }
            return Ok(());
        }

        let key = match event.key_code() {
            Some(key) => key,
            None => return Ok(()),
        };
        match key {
            KeyCode::BTN_LEFT => {
                if self.pointer.left_button(event, cx.mode(), now) {
                    cx.passthrough(event)?;
                }
            }
            KeyCode::KEY_VOLUMEUP | KeyCode::KEY_VOLUMEDOWN | KeyCode::KEY_MUTE => {
                cx.passthrough(event)?;
            }
            _ => {
                let button = match button_for(key) {
                    Some(button) => button,
                    None => {
                        tracing::debug!(code = key.code(), "Unmapped composite key");
                        return Ok(());
                    }
                };
                let gesture = match event.value {
                    KEY_PRESSED => Gesture::Click,
                    KEY_REPEATED => Gesture::Repeat,
                    KEY_RELEASED => Gesture::Release,
                    _ => return Ok(()),
                };
                out.push(Signal::Token(ActionToken::new(button, gesture)));
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, token: ActionToken<CompositeButton>, cx: &DispatchCx<'_>) -> Result<(), ActionError> {
        use CompositeButton as C;
        use Gesture::*;

        let overlay = cx.overlay();
        let mode = cx.mode();
        let visible = cx.visible();
        let normal = cx.normal_mode();

        match (token.button, token.gesture) {
            (C::Compose, Release) => overlay.switch_mode(1),
            (C::HomePage, Release) => cx.toggle_auto_mode(),

            (C::MouseMove, _) => self.pointer.on_move(cx),
            (C::MouseStop, _) => self.pointer.on_stop(cx),

            (C::PageUp, Release) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEUP)?;
                }
            }
            (C::PageDown, Release) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEDOWN)?;
                }
            }

            (C::Up, Click | Repeat) if visible => match mode {
                Mode::Laser => overlay.change_laser_size(1),
                Mode::Spotlight | Mode::MagnifyGlass => overlay.change_spot_radius(2),
                _ => {}
            },
            (C::Down, Click | Repeat) if visible => match mode {
                Mode::Laser => overlay.change_laser_size(-1),
                Mode::Spotlight | Mode::MagnifyGlass => overlay.change_spot_radius(-2),
                _ => {}
            },

            (C::Left, Click) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEUP)?;
                } else {
                    match mode {
                        Mode::MagnifyGlass => overlay.zoom(-1),
                        Mode::Laser => overlay.next_laser_color(-1),
                        Mode::Spotlight => overlay.next_shade_color(-1),
                        Mode::Pen => overlay.next_pen_color(-1),
                        Mode::Mouse => {}
                    }
                }
            }
            (C::Right, Click) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEDOWN)?;
                } else {
                    match mode {
                        Mode::MagnifyGlass => overlay.zoom(1),
                        Mode::Laser => overlay.next_laser_color(1),
                        Mode::Spotlight => overlay.next_shade_color(1),
                        Mode::Pen => overlay.next_pen_color(1),
                        Mode::Mouse => {}
                    }
                }
            }
            (C::Left, Repeat) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEUP)?;
                }
            }
            (C::Right, Repeat) => {
                if normal {
                    cx.key(KeyCode::KEY_PAGEDOWN)?;
                }
            }

            (C::PlayPause, Release) => {
                if normal {
                    self.presentation.toggle(cx)?;
                }
            }
            (C::Backspace, Release) => {
                if mode == Mode::Pen {
                    overlay.clear_drawing(false);
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pointer.idle_deadline()
    }

    fn poll(&mut self, now: Instant, out: &mut Vec<Signal<CompositeButton>>) {
        if self.pointer.take_idle(now) {
            out.push(Signal::Token(ActionToken::click(CompositeButton::MouseStop)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::*;
    use super::*;
    use crate::device_class::DeviceKind;
    use crate::overlay::Overlay;
    use evdev::RelativeAxisCode;

    fn key(code: KeyCode, value: i32) -> GenericEvent {
        GenericEvent::key(code, value)
    }

    #[test]
    fn test_page_keys_on_release_only() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        let t0 = Instant::now();
        driver.handle_event(&key(KeyCode::KEY_PAGEDOWN, KEY_PRESSED), t0);
        assert!(t.sink.events().is_empty());
        driver.handle_event(&key(KeyCode::KEY_PAGEDOWN, KEY_RELEASED), t0 + ms(90));
        assert_eq!(t.sink.pressed_keys(), vec![KeyCode::KEY_PAGEDOWN]);
    }

    #[test]
    fn test_compose_cycles_modes() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        let t0 = Instant::now();
        driver.handle_event(&key(KeyCode::KEY_COMPOSE, KEY_PRESSED), t0);
        driver.handle_event(&key(KeyCode::KEY_COMPOSE, KEY_RELEASED), t0 + ms(50));
        assert_eq!(t.overlay.mode(), Mode::Spotlight);
    }

    #[test]
    fn test_up_repeat_grows_spotlight() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        t.overlay.set_mode(Mode::Spotlight);
        let before = t.overlay.snapshot().spotlight_size;
        let t0 = Instant::now();
        driver.handle_event(&key(KeyCode::KEY_UP, KEY_PRESSED), t0);
        driver.handle_event(&key(KeyCode::KEY_UP, KEY_REPEATED), t0 + ms(250));
        driver.handle_event(&key(KeyCode::KEY_UP, KEY_REPEATED), t0 + ms(280));
        driver.handle_event(&key(KeyCode::KEY_UP, KEY_RELEASED), t0 + ms(300));
        assert_eq!(t.overlay.snapshot().spotlight_size, before + 6);
    }

    #[test]
    fn test_left_in_laser_changes_color() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        t.overlay.set_mode(Mode::Laser);
        driver.handle_event(&key(KeyCode::KEY_LEFT, KEY_PRESSED), Instant::now());
        assert_eq!(t.overlay.snapshot().laser_color, crate::overlay::LASER_COLOR_COUNT - 1);
        assert!(t.sink.events().is_empty());
    }

    #[test]
    fn test_play_pause_toggles_presentation() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        let t0 = Instant::now();
        for i in 0..2 {
            driver.handle_event(&key(KeyCode::KEY_PLAYPAUSE, KEY_PRESSED), t0 + ms(i * 500));
            driver.handle_event(&key(KeyCode::KEY_PLAYPAUSE, KEY_RELEASED), t0 + ms(i * 500 + 50));
        }
        assert_eq!(
            t.sink.pressed_keys(),
            vec![KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_F5, KeyCode::KEY_ESC]
        );
    }

    #[test]
    fn test_volume_passes_through() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        t.overlay.set_mode(Mode::Pen);
        let ev = key(KeyCode::KEY_VOLUMEUP, KEY_PRESSED);
        driver.handle_event(&ev, Instant::now());
        assert_eq!(t.sink.events(), vec![ev]);
    }

    #[test]
    fn test_idle_timer_hides_in_auto_mode() {
        let (t, mut driver) = driver(DeviceKind::AsaComposite);
        t.overlay.set_mode(Mode::Laser);
        t.overlay.set_auto_mode(true);
        let t0 = Instant::now();

        driver.handle_event(&GenericEvent::relative(RelativeAxisCode::REL_Y, 1), t0);
        assert!(t.overlay.is_visible());
        run_until(driver.as_mut(), t0 + ms(1500));
        assert!(!t.overlay.is_visible());
    }
}

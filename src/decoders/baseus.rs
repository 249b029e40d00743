//! Baseus Orange Dot AI presenter
//!
//! The vendor interface sends 16-byte reports terminated by `182`. Byte 5
//! holds a status code that stays constant while a button is down. Some
//! codes already encode a gesture (the remote resolves those itself);
//! the rest are buttons run through the gesture machine.

use std::fmt;

use evdev::KeyCode;

use super::{ActionError, Decoder, DispatchCx, HeldButton, PresentationToggle, Signal};
use crate::evdev::{GenericEvent, KEY_PRESSED, KEY_RELEASED};
use crate::gesture::{ActionToken, Button, Gesture};
use crate::mode::Mode;
use crate::overlay::Shade;

const REPORT_LEN: usize = 16;
const REPORT_ID: u8 = 10;
const TERMINATOR: u8 = 182;
const STATUS_OFFSET: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseusButton {
    Ok,
    Laser,
    Highlight,
    Prev,
    Next,
    Mouse,
    Mic,
    Language,
    VolumeUp,
    VolumeDown,
}

impl fmt::Display for BaseusButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BaseusButton::Ok => "OK",
            BaseusButton::Laser => "LASER",
            BaseusButton::Highlight => "HGL",
            BaseusButton::Prev => "PREV",
            BaseusButton::Next => "NEXT",
            BaseusButton::Mouse => "MOUSE",
            BaseusButton::Mic => "MIC",
            BaseusButton::Language => "LNG",
            BaseusButton::VolumeUp => "VOL_UP",
            BaseusButton::VolumeDown => "VOL_DOWN",
        })
    }
}

impl Button for BaseusButton {
    fn repeats_on_hold(self) -> bool {
        matches!(
            self,
            BaseusButton::Mic
                | BaseusButton::Language
                | BaseusButton::Mouse
                | BaseusButton::VolumeUp
                | BaseusButton::VolumeDown
        )
    }
}

/// What one status code means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    /// Gesture resolved by the remote
    Direct(ActionToken<BaseusButton>),
    /// Button down (or still down)
    Held(BaseusButton),
    /// Button up
    Up(BaseusButton),
    Unknown,
}

fn status(code: u8) -> Status {
    use BaseusButton::*;
    use Gesture::*;

    let direct = |button, gesture| Status::Direct(ActionToken::new(button, gesture));
    match code {
        0 => Status::Idle,
        97 => direct(Ok, Click),
        98 => direct(Ok, Double),
        99 => direct(Ok, Hold),
        100 => direct(Laser, Click),
        104 => direct(Highlight, Hold),
        105 => direct(Highlight, Release),
        107 => direct(Prev, Hold),
        109 => direct(Next, Hold),
        106 => Status::Held(Prev),
        108 => Status::Held(Next),
        113 | 114 => Status::Held(Mouse),
        115 => Status::Up(Mouse),
        116..=118 => Status::Held(Mic),
        119 => Status::Up(Mic),
        120 => Status::Held(VolumeUp),
        121 => Status::Held(VolumeDown),
        122..=124 => Status::Held(Language),
        125 => Status::Up(Language),
        _ => Status::Unknown,
    }
}

#[derive(Debug)]
pub struct BaseusDecoder {
    held: HeldButton<BaseusButton>,
    last_status: u8,
    presentation: PresentationToggle,
}

impl Default for BaseusDecoder {
    fn default() -> Self {
        Self {
            held: HeldButton::default(),
            last_status: 0,
            presentation: PresentationToggle::esc_first(),
        }
    }
}

impl BaseusDecoder {
    fn valid(report: &[u8]) -> bool {
        report.len() == REPORT_LEN && report[0] == REPORT_ID && report[REPORT_LEN - 1] == TERMINATOR
    }
}

impl Decoder for BaseusDecoder {
    type Button = BaseusButton;

    fn decode_report(&mut self, report: &[u8], out: &mut Vec<Signal<BaseusButton>>) {
        if !Self::valid(report) {
            tracing::trace!(len = report.len(), "Dropping malformed Baseus report");
            return;
        }
        let code = report[STATUS_OFFSET];
        let repeated = code == self.last_status;
        self.last_status = code;

        match status(code) {
            Status::Idle => self.held.release(out),
            Status::Direct(token) => {
                // The remote keeps reporting the code while held
                if !repeated {
                    out.push(Signal::Token(token));
                }
            }
            Status::Held(button) => self.held.press(button, out),
            Status::Up(button) => self.held.release_if(button, out),
            Status::Unknown => {
                tracing::debug!(status = code, "Unknown Baseus status");
                self.held.release(out);
            }
        }
    }

    fn decode_event(
        &mut self,
        event: &GenericEvent,
        cx: &DispatchCx<'_>,
        out: &mut Vec<Signal<BaseusButton>>,
    ) -> Result<(), ActionError> {
        if event.is_relative() {
            return cx.passthrough(event);
        }
        let key = match event.key_code() {
            Some(key) => key,
            None => return Ok(()),
        };

        if !cx.visible() {
            return cx.passthrough(event);
        }
        if key == KeyCode::KEY_E {
            match event.value {
                KEY_PRESSED => out.push(Signal::Press(BaseusButton::Highlight)),
                KEY_RELEASED => out.push(Signal::Release(BaseusButton::Highlight)),
                _ => {}
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, token: ActionToken<BaseusButton>, cx: &DispatchCx<'_>) -> Result<(), ActionError> {
        use BaseusButton as B;
        use Gesture::*;

        let overlay = cx.overlay();
        let mode = cx.mode();
        let visible = cx.visible();

        match (token.button, token.gesture) {
            (B::Ok, Click) => {
                if visible {
                    overlay.switch_mode(1);
                } else {
                    cx.key(KeyCode::BTN_LEFT)?;
                }
            }
            (B::Ok, Double) => {
                if visible {
                    overlay.switch_mode(1);
                } else {
                    cx.alt_tab()?;
                }
            }
            (B::Ok, Hold) => cx.toggle_auto_mode(),

            // Page keys already arrive on the keyboard interface
            (B::Prev, Hold) => {
                if !visible {
                    self.presentation.toggle(cx)?;
                }
            }

            (B::Mouse, Hold) => {
                if overlay.auto_mode_enabled() {
                    overlay.show_overlay();
                }
            }
            (B::Mouse, Release) => {
                if overlay.auto_mode_enabled() {
                    overlay.hide_overlay();
                }
            }
            (B::Mouse, Double) => overlay.switch_mode(1),

            (B::Mic, Click) => match mode {
                Mode::Laser => overlay.next_laser_color(1),
                Mode::Pen => overlay.next_pen_color(1),
                Mode::Spotlight => overlay.set_shade_color(Shade::White),
                _ => {}
            },
            (B::Language, Click) => match mode {
                Mode::Laser => overlay.next_laser_color(-1),
                Mode::Pen => overlay.next_pen_color(-1),
                Mode::Spotlight => overlay.set_shade_color(Shade::Black),
                _ => {}
            },

            (B::Highlight, Click) => {
                if mode == Mode::Pen {
                    overlay.clear_drawing(false);
                }
            }
            (B::Highlight, Double) => {
                if mode == Mode::Pen {
                    overlay.clear_drawing(true);
                }
            }

            (B::VolumeUp, Click) => adjust(cx, 1, Step::Coarse),
            (B::VolumeDown, Click) => adjust(cx, -1, Step::Coarse),
            (B::VolumeUp, Repeat) => adjust(cx, 1, Step::Fine),
            (B::VolumeDown, Repeat) => adjust(cx, -1, Step::Fine),

            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Coarse,
    Fine,
}

/// Volume keys resize whatever the current mode draws
fn adjust(cx: &DispatchCx<'_>, sign: i32, step: Step) {
    let overlay = cx.overlay();
    match (cx.mode(), step) {
        (Mode::Pen, Step::Coarse) => overlay.change_line_width(2 * sign),
        (Mode::Pen, Step::Fine) => overlay.change_line_width(sign),
        (Mode::MagnifyGlass, Step::Coarse) => overlay.zoom(sign),
        (Mode::MagnifyGlass, Step::Fine) => overlay.change_spot_radius(sign),
        (Mode::Laser, Step::Coarse) => overlay.change_laser_size(10 * sign),
        (Mode::Laser, Step::Fine) => overlay.change_laser_size(sign),
        (Mode::Spotlight, Step::Coarse) => overlay.change_spot_radius(5 * sign),
        (Mode::Spotlight, Step::Fine) => overlay.change_spot_radius(sign),
        (Mode::Mouse, _) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::*;
    use super::*;
    use crate::device_class::DeviceKind;
    use crate::overlay::Overlay;
    use std::time::Instant;

    fn report(code: u8) -> Vec<u8> {
        let mut r = vec![0u8; REPORT_LEN];
        r[0] = REPORT_ID;
        r[STATUS_OFFSET] = code;
        r[REPORT_LEN - 1] = TERMINATOR;
        r
    }

    #[test]
    fn test_held_status_becomes_edges() {
        let mut decoder = BaseusDecoder::default();
        let mut out = Vec::new();
        decoder.decode_report(&report(116), &mut out);
        decoder.decode_report(&report(117), &mut out);
        decoder.decode_report(&report(118), &mut out);
        decoder.decode_report(&report(119), &mut out);
        decoder.decode_report(&report(0), &mut out);
        assert_eq!(
            out,
            vec![Signal::Press(BaseusButton::Mic), Signal::Release(BaseusButton::Mic)]
        );
    }

    #[test]
    fn test_direct_token_deduplicated() {
        let mut decoder = BaseusDecoder::default();
        let mut out = Vec::new();
        decoder.decode_report(&report(99), &mut out);
        decoder.decode_report(&report(99), &mut out);
        decoder.decode_report(&report(0), &mut out);
        decoder.decode_report(&report(99), &mut out);
        let tokens: Vec<String> = out
            .iter()
            .filter_map(|s| match s {
                Signal::Token(t) => Some(t.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec!["OK+hold", "OK+hold"]);
    }

    #[test]
    fn test_switching_buttons_releases_previous() {
        let mut decoder = BaseusDecoder::default();
        let mut out = Vec::new();
        decoder.decode_report(&report(108), &mut out);
        decoder.decode_report(&report(106), &mut out);
        assert_eq!(
            out,
            vec![
                Signal::Press(BaseusButton::Next),
                Signal::Release(BaseusButton::Next),
                Signal::Press(BaseusButton::Prev),
            ]
        );
    }

    #[test]
    fn test_malformed_report_dropped() {
        let mut decoder = BaseusDecoder::default();
        let mut out = Vec::new();
        let mut bad = report(108);
        bad[0] = 9;
        decoder.decode_report(&bad, &mut out);
        decoder.decode_report(&report(108)[..12], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_mic_hold_repeats_without_click() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        t.overlay.set_mode(Mode::Laser);
        let t0 = Instant::now();

        driver.handle_report(&report(116), t0);
        let mut at = t0;
        while at < t0 + ms(1200) {
            at += ms(20);
            driver.handle_report(&report(117), at);
            run_until(driver.as_mut(), at);
        }
        driver.handle_report(&report(0), t0 + ms(1200));
        run_until(driver.as_mut(), t0 + ms(3000));

        // MIC click would have changed the laser colour
        assert_eq!(t.overlay.snapshot().laser_color, 0);
    }

    #[test]
    fn test_volume_click_resizes_laser() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        t.overlay.set_mode(Mode::Laser);
        let before = t.overlay.snapshot().laser_size;
        let t0 = Instant::now();

        driver.handle_report(&report(120), t0);
        driver.handle_report(&report(0), t0 + ms(80));
        run_until(driver.as_mut(), t0 + ms(2000));

        assert_eq!(t.overlay.snapshot().laser_size, before + 10);
    }

    #[test]
    fn test_ok_click_hidden_sends_left_button() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        driver.handle_report(&report(97), Instant::now());
        assert_eq!(t.sink.pressed_keys(), vec![KeyCode::BTN_LEFT]);
    }

    #[test]
    fn test_ok_click_visible_switches_mode() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        t.overlay.set_mode(Mode::Spotlight);
        driver.handle_report(&report(97), Instant::now());
        assert_eq!(t.overlay.mode(), Mode::Laser);
        assert!(t.sink.events().is_empty());
    }

    #[test]
    fn test_prev_hold_toggles_presentation() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        let t0 = Instant::now();
        driver.handle_report(&report(107), t0);
        driver.handle_report(&report(0), t0 + ms(10));
        driver.handle_report(&report(107), t0 + ms(20));
        assert_eq!(
            t.sink.pressed_keys(),
            vec![KeyCode::KEY_ESC, KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_F5]
        );
    }

    #[test]
    fn test_highlight_hold_leaves_drawing_alone() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        t.overlay.set_mode(Mode::Pen);
        let mut rx = t.overlay.subscribe();
        let t0 = Instant::now();

        // Direct hold status, then KEY_E held past the long-press interval
        driver.handle_report(&report(104), t0);
        driver.handle_report(&report(0), t0 + ms(10));
        driver.handle_event(&GenericEvent::key(KeyCode::KEY_E, KEY_PRESSED), t0 + ms(100));
        run_until(driver.as_mut(), t0 + ms(900));
        driver.handle_event(&GenericEvent::key(KeyCode::KEY_E, KEY_RELEASED), t0 + ms(900));
        run_until(driver.as_mut(), t0 + ms(3000));

        assert!(rx.try_recv().is_err());
        assert!(t.sink.events().is_empty());
    }

    #[test]
    fn test_key_e_is_highlight_when_visible() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        let t0 = Instant::now();

        // Hidden: the key goes straight out
        driver.handle_event(&GenericEvent::key(KeyCode::KEY_E, KEY_PRESSED), t0);
        assert_eq!(t.sink.pressed_keys(), vec![KeyCode::KEY_E]);

        t.overlay.set_mode(Mode::Pen);
        let mut rx = t.overlay.subscribe();
        driver.handle_event(&GenericEvent::key(KeyCode::KEY_E, KEY_PRESSED), t0 + ms(100));
        driver.handle_event(&GenericEvent::key(KeyCode::KEY_E, KEY_RELEASED), t0 + ms(150));
        run_until(driver.as_mut(), t0 + ms(2000));

        assert_eq!(
            rx.try_recv().ok(),
            Some(crate::overlay::OverlayCommand::DrawingCleared { all: false })
        );
        assert_eq!(t.sink.pressed_keys(), vec![KeyCode::KEY_E]);
    }

    #[test]
    fn test_motion_passes_through() {
        let (t, mut driver) = driver(DeviceKind::BaseusOrangeDotAi);
        t.overlay.set_mode(Mode::Spotlight);
        let ev = GenericEvent::relative(evdev::RelativeAxisCode::REL_X, 3);
        driver.handle_event(&ev, Instant::now());
        assert_eq!(t.sink.events(), vec![ev]);
    }
}

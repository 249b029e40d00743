//! Overlay action surface
//!
//! The renderer (spotlight, laser, pen, magnifier) lives in a separate
//! process. The daemon keeps the authoritative overlay state here and
//! publishes every change as an [`OverlayCommand`] on a broadcast channel,
//! which the D-Bus service forwards as signals.
//!
//! Decoders only see the [`Overlay`] trait.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::config::OverlayDefaults;
use crate::mode::Mode;

// ============================================================================
// Limits
// ============================================================================

pub const SPOT_RADIUS_MIN: i32 = 5;
pub const SPOT_RADIUS_MAX: i32 = 99;
pub const LASER_SIZE_MIN: i32 = 1;
pub const LASER_SIZE_MAX: i32 = 99;
pub const LINE_WIDTH_MIN: i32 = 1;
pub const LINE_WIDTH_MAX: i32 = 20;
pub const ZOOM_MIN: i32 = 2;
pub const ZOOM_MAX: i32 = 5;

/// Laser palette size; the last entry is transparent
pub const LASER_COLOR_COUNT: i32 = 10;
pub const PEN_COLOR_COUNT: i32 = 9;
pub const SHADE_COLOR_COUNT: i32 = 2;

/// Capacity of the command broadcast channel
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Colour of the spotlight's surrounding shade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shade {
    Black,
    White,
}

impl Shade {
    fn index(self) -> i32 {
        match self {
            Shade::Black => 0,
            Shade::White => 1,
        }
    }
}

/// Numeric overlay settings that change in steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    SpotlightSize,
    MagnifySize,
    MagnifyZoom,
    LaserSize,
    LineWidth,
    LaserColor,
    PenColor,
    ShadeColor,
}

impl Setting {
    pub fn as_str(self) -> &'static str {
        match self {
            Setting::SpotlightSize => "spotlight_size",
            Setting::MagnifySize => "magnify_size",
            Setting::MagnifyZoom => "magnify_zoom",
            Setting::LaserSize => "laser_size",
            Setting::LineWidth => "line_width",
            Setting::LaserColor => "laser_color",
            Setting::PenColor => "pen_color",
            Setting::ShadeColor => "shade_color",
        }
    }
}

/// Change published to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayCommand {
    ModeChanged(Mode),
    VisibilityChanged(bool),
    AutoModeChanged(bool),
    SettingChanged(Setting, i32),
    DrawingCleared { all: bool },
    PenPathFinished,
}

/// Snapshot of overlay state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub mode: Mode,
    pub visible: bool,
    pub auto_mode: bool,
    pub drawing: bool,
    pub spotlight_size: i32,
    pub magnify_size: i32,
    pub magnify_zoom: i32,
    pub laser_size: i32,
    pub line_width: i32,
    pub laser_color: i32,
    pub pen_color: i32,
    pub shade_color: i32,
}

impl OverlayState {
    pub fn from_defaults(defaults: &OverlayDefaults) -> Self {
        Self {
            mode: Mode::Mouse,
            visible: false,
            auto_mode: false,
            drawing: false,
            spotlight_size: defaults.spotlight_size.clamp(SPOT_RADIUS_MIN, SPOT_RADIUS_MAX),
            magnify_size: defaults.magnify_size.clamp(SPOT_RADIUS_MIN, SPOT_RADIUS_MAX),
            magnify_zoom: defaults.magnify_zoom.clamp(ZOOM_MIN, ZOOM_MAX),
            laser_size: defaults.laser_size.clamp(LASER_SIZE_MIN, LASER_SIZE_MAX),
            line_width: defaults.line_width.clamp(LINE_WIDTH_MIN, LINE_WIDTH_MAX),
            laser_color: defaults.laser_color.rem_euclid(LASER_COLOR_COUNT),
            pen_color: defaults.pen_color.rem_euclid(PEN_COLOR_COUNT),
            shade_color: defaults.shade_color.rem_euclid(SHADE_COLOR_COUNT),
        }
    }
}

impl Default for OverlayState {
    fn default() -> Self {
        Self::from_defaults(&OverlayDefaults::default())
    }
}

/// Actions a decoder may invoke on the overlay
pub trait Overlay: Send + Sync {
    fn mode(&self) -> Mode;
    fn is_visible(&self) -> bool;
    fn auto_mode_enabled(&self) -> bool;
    /// A pen stroke is in progress
    fn is_drawing(&self) -> bool;

    /// Publish the modes and auto-mode support of the active device
    fn set_compatible_modes(&self, modes: &[Mode], supports_auto_mode: bool);

    /// Move `step` positions through the compatible modes
    fn switch_mode(&self, step: i32);
    /// Jump to `mode` if it is compatible; returns whether it was applied
    fn set_mode(&self, mode: Mode) -> bool;

    fn change_spot_radius(&self, delta: i32);
    fn change_laser_size(&self, delta: i32);
    fn change_line_width(&self, delta: i32);
    fn zoom(&self, direction: i32);
    fn next_laser_color(&self, step: i32);
    fn next_pen_color(&self, step: i32);
    fn next_shade_color(&self, step: i32);
    fn set_shade_color(&self, shade: Shade);

    fn clear_drawing(&self, all: bool);
    fn finish_pen_path(&self);
    fn set_drawing(&self, drawing: bool);

    fn show_overlay(&self);
    fn hide_overlay(&self);
    fn set_auto_mode(&self, enable: bool);
}

#[derive(Debug)]
struct Inner {
    state: OverlayState,
    compatible: Vec<Mode>,
    supports_auto_mode: bool,
}

/// Daemon-side owner of the overlay state
pub struct OverlayController {
    inner: Mutex<Inner>,
    commands: broadcast::Sender<OverlayCommand>,
}

impl OverlayController {
    pub fn new(defaults: &OverlayDefaults) -> Self {
        let (commands, _) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                state: OverlayState::from_defaults(defaults),
                compatible: Mode::ALL.to_vec(),
                supports_auto_mode: false,
            }),
            commands,
        }
    }

    /// Receive every command published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayCommand> {
        self.commands.subscribe()
    }

    pub fn snapshot(&self) -> OverlayState {
        self.with(|inner, _| inner.state.clone())
    }

    pub fn compatible_modes(&self) -> Vec<Mode> {
        self.with(|inner, _| inner.compatible.clone())
    }

    /// Run `f` under the state lock, then publish what it produced
    fn with<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<OverlayCommand>) -> R) -> R {
        let mut out = Vec::new();
        let result = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut inner, &mut out)
        };
        for command in out {
            tracing::debug!(?command, "Overlay command");
            // No receivers is fine: the renderer may not be attached yet
            let _ = self.commands.send(command);
        }
        result
    }

    fn apply_mode(inner: &mut Inner, mode: Mode, out: &mut Vec<OverlayCommand>) {
        if inner.state.mode != mode {
            inner.state.mode = mode;
            out.push(OverlayCommand::ModeChanged(mode));
        }
        let visible = mode != Mode::Mouse;
        Self::apply_visibility(inner, visible, out);
    }

    fn apply_visibility(inner: &mut Inner, visible: bool, out: &mut Vec<OverlayCommand>) {
        if inner.state.visible != visible {
            inner.state.visible = visible;
            out.push(OverlayCommand::VisibilityChanged(visible));
        }
    }

    fn mode_allowed(inner: &Inner, mode: Mode) -> bool {
        inner.compatible.contains(&mode) && !(mode == Mode::Pen && inner.state.auto_mode)
    }

    fn step_setting(
        value: &mut i32,
        delta: i32,
        min: i32,
        max: i32,
        setting: Setting,
        out: &mut Vec<OverlayCommand>,
    ) {
        let next = value.saturating_add(delta).clamp(min, max);
        if next != *value {
            *value = next;
            out.push(OverlayCommand::SettingChanged(setting, next));
        }
    }

    fn cycle_setting(value: &mut i32, step: i32, count: i32, setting: Setting, out: &mut Vec<OverlayCommand>) {
        let next = (*value + step).rem_euclid(count);
        if next != *value {
            *value = next;
            out.push(OverlayCommand::SettingChanged(setting, next));
        }
    }
}

impl Overlay for OverlayController {
    fn mode(&self) -> Mode {
        self.with(|inner, _| inner.state.mode)
    }

    fn is_visible(&self) -> bool {
        self.with(|inner, _| inner.state.visible)
    }

    fn auto_mode_enabled(&self) -> bool {
        self.with(|inner, _| inner.state.auto_mode)
    }

    fn is_drawing(&self) -> bool {
        self.with(|inner, _| inner.state.drawing)
    }

    fn set_compatible_modes(&self, modes: &[Mode], supports_auto_mode: bool) {
        self.with(|inner, out| {
            inner.compatible = modes.to_vec();
            inner.supports_auto_mode = supports_auto_mode;
            if !supports_auto_mode && inner.state.auto_mode {
                inner.state.auto_mode = false;
                out.push(OverlayCommand::AutoModeChanged(false));
            }
            if !inner.compatible.contains(&inner.state.mode) {
                let fallback = inner.compatible.first().copied().unwrap_or(Mode::Mouse);
                Self::apply_mode(inner, fallback, out);
            }
        });
    }

    fn switch_mode(&self, step: i32) {
        self.with(|inner, out| {
            let count = Mode::ALL.len() as i32;
            let mut index = inner.state.mode.index() as i32;
            for _ in 0..count {
                index = (index + step).rem_euclid(count);
                let candidate = Mode::ALL[index as usize];
                if Self::mode_allowed(inner, candidate) {
                    Self::apply_mode(inner, candidate, out);
                    return;
                }
            }
        });
    }

    fn set_mode(&self, mode: Mode) -> bool {
        self.with(|inner, out| {
            if !Self::mode_allowed(inner, mode) {
                tracing::debug!(%mode, "Mode not available for the active device");
                return false;
            }
            Self::apply_mode(inner, mode, out);
            true
        })
    }

    fn change_spot_radius(&self, delta: i32) {
        self.with(|inner, out| {
            let state = &mut inner.state;
            match state.mode {
                Mode::Spotlight => Self::step_setting(
                    &mut state.spotlight_size,
                    delta,
                    SPOT_RADIUS_MIN,
                    SPOT_RADIUS_MAX,
                    Setting::SpotlightSize,
                    out,
                ),
                Mode::MagnifyGlass => Self::step_setting(
                    &mut state.magnify_size,
                    delta,
                    SPOT_RADIUS_MIN,
                    SPOT_RADIUS_MAX,
                    Setting::MagnifySize,
                    out,
                ),
                _ => {}
            }
        });
    }

    fn change_laser_size(&self, delta: i32) {
        self.with(|inner, out| {
            Self::step_setting(
                &mut inner.state.laser_size,
                delta,
                LASER_SIZE_MIN,
                LASER_SIZE_MAX,
                Setting::LaserSize,
                out,
            )
        });
    }

    fn change_line_width(&self, delta: i32) {
        self.with(|inner, out| {
            Self::step_setting(
                &mut inner.state.line_width,
                delta,
                LINE_WIDTH_MIN,
                LINE_WIDTH_MAX,
                Setting::LineWidth,
                out,
            )
        });
    }

    fn zoom(&self, direction: i32) {
        self.with(|inner, out| {
            if inner.state.mode == Mode::MagnifyGlass {
                Self::step_setting(
                    &mut inner.state.magnify_zoom,
                    direction.signum(),
                    ZOOM_MIN,
                    ZOOM_MAX,
                    Setting::MagnifyZoom,
                    out,
                );
            }
        });
    }

    fn next_laser_color(&self, step: i32) {
        self.with(|inner, out| {
            Self::cycle_setting(&mut inner.state.laser_color, step, LASER_COLOR_COUNT, Setting::LaserColor, out)
        });
    }

    fn next_pen_color(&self, step: i32) {
        self.with(|inner, out| {
            Self::cycle_setting(&mut inner.state.pen_color, step, PEN_COLOR_COUNT, Setting::PenColor, out)
        });
    }

    fn next_shade_color(&self, step: i32) {
        self.with(|inner, out| {
            Self::cycle_setting(&mut inner.state.shade_color, step, SHADE_COLOR_COUNT, Setting::ShadeColor, out)
        });
    }

    fn set_shade_color(&self, shade: Shade) {
        self.with(|inner, out| {
            let index = shade.index();
            if inner.state.shade_color != index {
                inner.state.shade_color = index;
                out.push(OverlayCommand::SettingChanged(Setting::ShadeColor, index));
            }
        });
    }

    fn clear_drawing(&self, all: bool) {
        self.with(|_, out| out.push(OverlayCommand::DrawingCleared { all }));
    }

    fn finish_pen_path(&self) {
        self.with(|inner, out| {
            inner.state.drawing = false;
            out.push(OverlayCommand::PenPathFinished);
        });
    }

    fn set_drawing(&self, drawing: bool) {
        self.with(|inner, _| inner.state.drawing = drawing);
    }

    fn show_overlay(&self) {
        self.with(|inner, out| {
            if inner.state.mode != Mode::Mouse {
                Self::apply_visibility(inner, true, out);
            }
        });
    }

    fn hide_overlay(&self) {
        self.with(|inner, out| Self::apply_visibility(inner, false, out));
    }

    fn set_auto_mode(&self, enable: bool) {
        self.with(|inner, out| {
            let enabled = enable && inner.supports_auto_mode;
            if inner.state.auto_mode != enabled {
                inner.state.auto_mode = enabled;
                out.push(OverlayCommand::AutoModeChanged(enabled));
            }
            if enabled {
                // Auto mode cannot coexist with the pen
                if inner.state.mode == Mode::Pen {
                    let fallback = if inner.compatible.contains(&Mode::Spotlight) {
                        Mode::Spotlight
                    } else {
                        Mode::Mouse
                    };
                    Self::apply_mode(inner, fallback, out);
                }
                Self::apply_visibility(inner, false, out);
            } else if inner.state.mode != Mode::Mouse {
                Self::apply_visibility(inner, true, out);
            }
        });
    }
}

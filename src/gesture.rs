//! Button gesture disambiguation
//!
//! Turns press/release edges of physical buttons into one of several
//! mutually exclusive gestures: a plain click, a double click, a long press
//! (hold), or a hold that keeps repeating until release.
//!
//! The machine is a plain value driven by an explicit clock. It never spawns
//! timers itself: the owner asks for [`GestureMachine::next_deadline`] and
//! calls [`GestureMachine::poll`] when it is reached. This keeps every device
//! runtime single-threaded and makes the timing behaviour testable without
//! sleeping.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A physical button on some remote
///
/// Implemented by each decoder's closed button enum.
pub trait Button: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static {
    /// Whether a hold on this button keeps firing `Repeat` after `Hold`
    fn repeats_on_hold(self) -> bool {
        false
    }

    /// Suffix used when rendering a `Hold` token
    fn hold_label(self) -> &'static str {
        "hold"
    }
}

/// Gesture resolved for a single press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Click,
    Double,
    Hold,
    Repeat,
    Release,
}

/// A button plus the gesture it resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionToken<B> {
    pub button: B,
    pub gesture: Gesture,
}

impl<B> ActionToken<B> {
    pub fn new(button: B, gesture: Gesture) -> Self {
        Self { button, gesture }
    }

    pub fn click(button: B) -> Self {
        Self::new(button, Gesture::Click)
    }
}

impl<B: Button> fmt::Display for ActionToken<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gesture {
            Gesture::Click => write!(f, "{}", self.button),
            Gesture::Double => write!(f, "{}++", self.button),
            Gesture::Hold => write!(f, "{}+{}", self.button, self.button.hold_label()),
            Gesture::Repeat => write!(f, "{}+repeat", self.button),
            Gesture::Release => write!(f, "{}+release", self.button),
        }
    }
}

/// Timing policy of one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureConfig {
    /// Maximum gap between two releases that still counts as a double click
    pub double_click: Duration,
    /// Hold threshold. `None` selects release-resolved clicks: a plain click
    /// is only decided `double_click` after the release.
    pub long_press: Option<Duration>,
    /// Period of the repeat stream
    pub repeat: Duration,
    /// Emit `Release` when a hold (without repeat) ends
    pub release_after_hold: bool,
}

impl GestureConfig {
    /// Clicks resolve at the long-press deadline
    pub const fn press_resolved(double_click_ms: u64, long_press_ms: u64, repeat_ms: u64) -> Self {
        Self {
            double_click: Duration::from_millis(double_click_ms),
            long_press: Some(Duration::from_millis(long_press_ms)),
            repeat: Duration::from_millis(repeat_ms),
            release_after_hold: true,
        }
    }

    /// Clicks resolve `double_click_ms` after release, no hold detection
    pub const fn release_resolved(double_click_ms: u64) -> Self {
        Self {
            double_click: Duration::from_millis(double_click_ms),
            long_press: None,
            repeat: Duration::from_millis(50),
            release_after_hold: false,
        }
    }

    pub const fn without_release_after_hold(mut self) -> Self {
        self.release_after_hold = false;
        self
    }
}

#[derive(Debug, Clone)]
struct ButtonState {
    pressed_at: Instant,
    long_press_at: Option<Instant>,
    long_press_fired: bool,
    repeat_active: bool,
    is_second_click: bool,
    next_repeat_at: Option<Instant>,
}

/// Per-device gesture state for every button of type `B`
#[derive(Debug)]
pub struct GestureMachine<B: Button> {
    config: GestureConfig,
    held: HashMap<B, ButtonState>,
    last_release: HashMap<B, Instant>,
    pending_clicks: HashMap<B, Instant>,
}

impl<B: Button> GestureMachine<B> {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            held: HashMap::new(),
            last_release: HashMap::new(),
            pending_clicks: HashMap::new(),
        }
    }

    pub fn config(&self) -> GestureConfig {
        self.config
    }

    /// Whether `button` is currently held down
    pub fn is_held(&self, button: B) -> bool {
        self.held.contains_key(&button)
    }

    /// Record a press edge
    ///
    /// Presses never resolve a gesture on their own. A press for a button
    /// that is already held is ignored.
    pub fn press(&mut self, button: B, now: Instant) {
        if self.held.contains_key(&button) {
            return;
        }

        let is_second_click = self
            .last_release
            .get(&button)
            .map_or(false, |&at| now.saturating_duration_since(at) < self.config.double_click);

        self.pending_clicks.remove(&button);

        let long_press_at = self.config.long_press.map(|lp| now + lp);
        if let Some(at) = long_press_at {
            if !is_second_click {
                self.pending_clicks.insert(button, at);
            }
        }

        self.held.insert(
            button,
            ButtonState {
                pressed_at: now,
                long_press_at,
                long_press_fired: false,
                repeat_active: false,
                is_second_click,
                next_repeat_at: None,
            },
        );
    }

    /// Record a release edge and return any gesture it resolves
    ///
    /// Deadlines that passed before the edge was seen fire first, so a
    /// late release of a long press still resolves as a hold.
    pub fn release(&mut self, button: B, now: Instant) -> Vec<ActionToken<B>> {
        let mut out = self.poll(now);
        let state = match self.held.remove(&button) {
            Some(state) => state,
            None => return out,
        };
        let previous_release = self.last_release.insert(button, now);

        if state.repeat_active {
            out.push(ActionToken::new(button, Gesture::Release));
            return out;
        }
        if state.long_press_fired {
            if self.config.release_after_hold {
                out.push(ActionToken::new(button, Gesture::Release));
            }
            return out;
        }

        let held_for = now.saturating_duration_since(state.pressed_at);
        let limit = self.config.long_press.unwrap_or(self.config.double_click);
        let quick_second = previous_release
            .map_or(false, |at| now.saturating_duration_since(at) < self.config.double_click);

        if quick_second && held_for < limit {
            self.pending_clicks.remove(&button);
            out.push(ActionToken::new(button, Gesture::Double));
            return out;
        }

        match self.config.long_press {
            None => {
                self.pending_clicks.insert(button, now + self.config.double_click);
            }
            // Second press released past the double window: no pending
            // click stands behind it, so it counts as one click now
            Some(_) if state.is_second_click => out.push(ActionToken::click(button)),
            Some(_) => {}
        }
        out
    }

    /// Fire every deadline that is due at `now`
    pub fn poll(&mut self, now: Instant) -> Vec<ActionToken<B>> {
        let mut out = Vec::new();
        let config = self.config;

        for (&button, state) in self.held.iter_mut() {
            if let Some(at) = state.long_press_at {
                if at <= now {
                    state.long_press_at = None;
                    state.long_press_fired = true;
                    self.pending_clicks.remove(&button);

                    if state.is_second_click {
                        state.repeat_active = true;
                        state.next_repeat_at = Some(at);
                    } else {
                        out.push(ActionToken::new(button, Gesture::Hold));
                        if button.repeats_on_hold() {
                            state.repeat_active = true;
                            state.next_repeat_at = Some(at + config.repeat);
                        }
                    }
                }
            }

            if !state.repeat_active {
                continue;
            }
            if let Some(at) = state.next_repeat_at {
                if at <= now {
                    out.push(ActionToken::new(button, Gesture::Repeat));
                    let next = at + config.repeat;
                    // Skip ticks missed by a late poll instead of bursting them
                    state.next_repeat_at = Some(if next <= now { now + config.repeat } else { next });
                }
            }
        }

        let due: Vec<B> = self
            .pending_clicks
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(&button, _)| button)
            .collect();

        for button in due {
            self.pending_clicks.remove(&button);
            let suppressed = self
                .held
                .get(&button)
                .map_or(false, |s| s.long_press_fired || s.repeat_active);
            if !suppressed {
                out.push(ActionToken::click(button));
            }
        }

        out
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let held = self.held.values().flat_map(|s| {
            let repeat = if s.repeat_active { s.next_repeat_at } else { None };
            s.long_press_at.into_iter().chain(repeat)
        });
        held.chain(self.pending_clicks.values().copied()).min()
    }

    /// Drop every held button and pending deadline
    pub fn reset(&mut self) {
        self.held.clear();
        self.last_release.clear();
        self.pending_clicks.clear();
    }
}

// ============================================================================
// Relative motion gestures
// ============================================================================

/// Direction of a swipe made with the remote's motion sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Axis of a relative motion sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Default rolling window length, in samples per axis
pub const MOTION_WINDOW: usize = 15;

/// Default number of same-signed samples that trigger a swipe
pub const MOTION_TRIGGER: usize = 8;

/// Rolling window over recent relative motion
///
/// A swipe fires once the window for an axis is full and at least `trigger`
/// of its samples share a sign. X is checked before Y. Firing clears both
/// windows.
#[derive(Debug, Clone)]
pub struct MotionGestureBuffer {
    x: VecDeque<i32>,
    y: VecDeque<i32>,
    window: usize,
    trigger: usize,
}

impl Default for MotionGestureBuffer {
    fn default() -> Self {
        Self::new(MOTION_WINDOW, MOTION_TRIGGER)
    }
}

impl MotionGestureBuffer {
    pub fn new(window: usize, trigger: usize) -> Self {
        Self {
            x: VecDeque::with_capacity(window + 1),
            y: VecDeque::with_capacity(window + 1),
            window,
            trigger,
        }
    }

    pub fn push(&mut self, axis: Axis, value: i32) -> Option<MotionDirection> {
        let buf = match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        };
        buf.push_back(value);
        if buf.len() > self.window {
            buf.pop_front();
        }

        let direction = self.detect();
        if direction.is_some() {
            self.clear();
        }
        direction
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
    }

    fn detect(&self) -> Option<MotionDirection> {
        let count = |buf: &VecDeque<i32>| {
            let negative = buf.iter().filter(|v| **v < 0).count();
            let positive = buf.iter().filter(|v| **v > 0).count();
            (negative, positive)
        };

        if self.x.len() == self.window {
            let (left, right) = count(&self.x);
            if left >= self.trigger {
                return Some(MotionDirection::Left);
            }
            if right >= self.trigger {
                return Some(MotionDirection::Right);
            }
        }
        if self.y.len() == self.window {
            let (up, down) = count(&self.y);
            if up >= self.trigger {
                return Some(MotionDirection::Up);
            }
            if down >= self.trigger {
                return Some(MotionDirection::Down);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Key {
        Next,
        Mic,
    }

    impl fmt::Display for Key {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Key::Next => "NEXT",
                Key::Mic => "MIC",
            })
        }
    }

    impl Button for Key {
        fn repeats_on_hold(self) -> bool {
            matches!(self, Key::Mic)
        }
    }

    const DEFAULT: GestureConfig = GestureConfig::press_resolved(400, 600, 50);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Drive the machine through its own deadlines up to `until`
    fn run_until(m: &mut GestureMachine<Key>, until: Instant, out: &mut Vec<String>) {
        while let Some(at) = m.next_deadline() {
            if at > until {
                break;
            }
            out.extend(m.poll(at).iter().map(|t| t.to_string()));
        }
    }

    #[test]
    fn test_single_click_resolves_at_long_press_deadline() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(80)).iter().map(|t| t.to_string()));
        assert!(out.is_empty());
        assert_eq!(m.next_deadline(), Some(t0 + ms(600)));

        run_until(&mut m, t0 + ms(2000), &mut out);
        assert_eq!(out, vec!["NEXT"]);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_separated_presses_give_one_click_each() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        for i in 0..3u64 {
            let start = t0 + ms(i * 1000);
            run_until(&mut m, start, &mut out);
            m.press(Key::Next, start);
            run_until(&mut m, start + ms(100), &mut out);
            out.extend(m.release(Key::Next, start + ms(100)).iter().map(|t| t.to_string()));
        }
        run_until(&mut m, t0 + ms(5000), &mut out);
        assert_eq!(out, vec!["NEXT", "NEXT", "NEXT"]);
    }

    #[test]
    fn test_double_click_scenario() {
        // Two 80 ms presses 150 ms apart
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(80)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(150), &mut out);
        m.press(Key::Next, t0 + ms(150));
        out.extend(m.release(Key::Next, t0 + ms(230)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(3000), &mut out);

        assert_eq!(out, vec!["NEXT++"]);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_hold_emits_once_and_never_click() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        run_until(&mut m, t0 + ms(1500), &mut out);
        out.extend(m.release(Key::Next, t0 + ms(1500)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(3000), &mut out);

        assert_eq!(out, vec!["NEXT+hold", "NEXT+release"]);
    }

    #[test]
    fn test_hold_without_release_token() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT.without_release_after_hold());
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        run_until(&mut m, t0 + ms(900), &mut out);
        out.extend(m.release(Key::Next, t0 + ms(900)).iter().map(|t| t.to_string()));
        assert_eq!(out, vec!["NEXT+hold"]);
    }

    #[test]
    fn test_hold_with_repeat_scenario() {
        // MIC held for 1200 ms, repeat period 50 ms
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Mic, t0);
        run_until(&mut m, t0 + ms(1199), &mut out);
        out.extend(m.release(Key::Mic, t0 + ms(1199)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(5000), &mut out);

        assert_eq!(out.first().map(String::as_str), Some("MIC+hold"));
        assert_eq!(out.last().map(String::as_str), Some("MIC+release"));
        assert_eq!(out.iter().filter(|t| *t == "MIC+hold").count(), 1);
        assert_eq!(out.iter().filter(|t| *t == "MIC+release").count(), 1);
        assert!(!out.iter().any(|t| t == "MIC"));
        // Repeats at 650, 700, ... 1150
        assert_eq!(out.iter().filter(|t| *t == "MIC+repeat").count(), 11);
    }

    #[test]
    fn test_second_click_hold_starts_repeat_stream() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(80)).iter().map(|t| t.to_string()));
        m.press(Key::Next, t0 + ms(200));
        run_until(&mut m, t0 + ms(900), &mut out);
        out.extend(m.release(Key::Next, t0 + ms(900)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(3000), &mut out);

        assert!(!out.iter().any(|t| t == "NEXT" || t == "NEXT+hold" || t == "NEXT++"));
        assert_eq!(out.last().map(String::as_str), Some("NEXT+release"));
        // First repeat at 800, then 850, 900
        assert_eq!(out.iter().filter(|t| *t == "NEXT+repeat").count(), 3);
    }

    #[test]
    fn test_late_release_of_long_press_is_hold() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        // No poll between press and release
        out.extend(m.release(Key::Next, t0 + ms(700)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(3000), &mut out);

        assert_eq!(out, vec!["NEXT+hold", "NEXT+release"]);
    }

    #[test]
    fn test_late_release_of_second_click_repeats() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(80)).iter().map(|t| t.to_string()));
        m.press(Key::Next, t0 + ms(200));
        out.extend(m.release(Key::Next, t0 + ms(900)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(3000), &mut out);

        assert_eq!(out, vec!["NEXT+repeat", "NEXT+release"]);
    }

    #[test]
    fn test_slow_second_click_counts_once() {
        // Second press inside the double window, released after it
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(80)).iter().map(|t| t.to_string()));
        m.press(Key::Next, t0 + ms(300));
        run_until(&mut m, t0 + ms(550), &mut out);
        let at_release: Vec<String> = m.release(Key::Next, t0 + ms(550)).iter().map(|t| t.to_string()).collect();

        assert_eq!(at_release, vec!["NEXT"]);
        run_until(&mut m, t0 + ms(3000), &mut out);
        assert!(out.is_empty());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_no_repeat_after_release() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);

        m.press(Key::Mic, t0);
        let mut out = Vec::new();
        run_until(&mut m, t0 + ms(700), &mut out);
        m.release(Key::Mic, t0 + ms(710));
        assert_eq!(m.next_deadline(), None);
        assert!(m.poll(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn test_reset_cancels_everything() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);

        m.press(Key::Mic, t0);
        m.press(Key::Next, t0);
        m.reset();
        assert_eq!(m.next_deadline(), None);
        assert!(m.poll(t0 + ms(5000)).is_empty());
        assert!(!m.is_held(Key::Mic));
    }

    #[test]
    fn test_duplicate_press_is_ignored() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(DEFAULT);
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        m.press(Key::Next, t0 + ms(50));
        out.extend(m.release(Key::Next, t0 + ms(100)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(2000), &mut out);
        assert_eq!(out, vec!["NEXT"]);
    }

    #[test]
    fn test_release_resolved_click() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(GestureConfig::release_resolved(300));
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(100)).iter().map(|t| t.to_string()));
        assert_eq!(m.next_deadline(), Some(t0 + ms(400)));
        run_until(&mut m, t0 + ms(1000), &mut out);
        assert_eq!(out, vec!["NEXT"]);
    }

    #[test]
    fn test_release_resolved_double() {
        let t0 = Instant::now();
        let mut m = GestureMachine::new(GestureConfig::release_resolved(300));
        let mut out = Vec::new();

        m.press(Key::Next, t0);
        out.extend(m.release(Key::Next, t0 + ms(60)).iter().map(|t| t.to_string()));
        m.press(Key::Next, t0 + ms(150));
        out.extend(m.release(Key::Next, t0 + ms(220)).iter().map(|t| t.to_string()));
        run_until(&mut m, t0 + ms(1000), &mut out);
        assert_eq!(out, vec!["NEXT++"]);
    }

    #[test]
    fn test_release_after_unrelated_button_is_noop() {
        let t0 = Instant::now();
        let mut m: GestureMachine<Key> = GestureMachine::new(DEFAULT);
        assert!(m.release(Key::Next, t0).is_empty());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(ActionToken::new(Key::Mic, Gesture::Hold).to_string(), "MIC+hold");
        assert_eq!(ActionToken::new(Key::Mic, Gesture::Repeat).to_string(), "MIC+repeat");
        assert_eq!(ActionToken::new(Key::Next, Gesture::Double).to_string(), "NEXT++");
        assert_eq!(ActionToken::click(Key::Next).to_string(), "NEXT");
    }

    #[test]
    fn test_motion_needs_full_window() {
        let mut buf = MotionGestureBuffer::default();
        for _ in 0..MOTION_WINDOW - 1 {
            assert_eq!(buf.push(Axis::X, -3), None);
        }
        assert_eq!(buf.push(Axis::X, -3), Some(MotionDirection::Left));
        // Cleared after firing
        assert_eq!(buf.push(Axis::X, -3), None);
    }

    #[test]
    fn test_motion_mixed_signs_below_trigger() {
        let mut buf = MotionGestureBuffer::default();
        let mut fired = None;
        for i in 0..MOTION_WINDOW {
            let v = if i % 2 == 0 { 1 } else { -1 };
            fired = fired.or(buf.push(Axis::Y, v));
        }
        // 8 positive, 7 negative: positive reaches the trigger
        assert_eq!(fired, Some(MotionDirection::Down));

        let mut buf = MotionGestureBuffer::new(15, 9);
        let mut fired = None;
        for i in 0..MOTION_WINDOW {
            let v = if i % 2 == 0 { 1 } else { -1 };
            fired = fired.or(buf.push(Axis::Y, v));
        }
        assert_eq!(fired, None);
    }

    #[test]
    fn test_motion_up() {
        let mut buf = MotionGestureBuffer::default();
        let mut fired = None;
        for _ in 0..MOTION_WINDOW {
            fired = fired.or(buf.push(Axis::Y, -2));
        }
        assert_eq!(fired, Some(MotionDirection::Up));
    }
}

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(key);
        }
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphabetic() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
            if ch.is_ascii_digit() {
                return Some(Self::Digit(ch as u8 - b'0'));
            }
        }
        if let Some(function) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
            if let Ok(index) = function.parse::<u8>() {
                if (1..=25).contains(&index) {
                    return Some(Self::Function(index));
                }
            }
        }
        None
    }
}

fn parse_named_key(name: &str) -> Option<KeyCode> {
    use NamedKey::*;
    let key = match name {
        "Space" => Space,
        "Enter" | "Return" => Enter,
        "Tab" => Tab,
        "Left" => Left,
        "Right" => Right,
        "Up" => Up,
        "Down" => Down,
        "Escape" | "Esc" => Escape,
        "Backspace" => Backspace,
        "LeftShift" | "LShift" => LeftShift,
        "RightShift" | "RShift" => RightShift,
        "LeftCtrl" | "LControl" => LeftCtrl,
        "RightCtrl" | "RControl" => RightCtrl,
        _ => return None,
    };
    Some(KeyCode::Named(key))
}

/// Friendly names for the non-printable keys that can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Escape,
    Backspace,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
}

/// A discrete event produced by the windowing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Window close or other request to end the application.
    Quit,
    /// Relative pointer motion since the previous event.
    MouseMotion { dx: i32, dy: i32 },
    KeyDown(KeyCode),
    KeyUp(KeyCode),
}

/// Turns fractional pointer deltas into whole-unit motion events.
///
/// The fraction left over from each delta is carried into the next one, so
/// slow movement still adds up instead of rounding away.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionAccumulator {
    remainder: (f64, f64),
}

impl MotionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw delta and returns the whole units now available, if any.
    pub fn accumulate(&mut self, dx: f64, dy: f64) -> Option<InputEvent> {
        let x = self.remainder.0 + dx;
        let y = self.remainder.1 + dy;
        let whole_x = x.trunc();
        let whole_y = y.trunc();
        self.remainder = (x - whole_x, y - whole_y);
        if whole_x == 0.0 && whole_y == 0.0 {
            return None;
        }
        Some(InputEvent::MouseMotion {
            dx: whole_x as i32,
            dy: whole_y as i32,
        })
    }
}

/// Which keys are currently held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardState {
    keys: HashSet<KeyCode>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_down(&mut self, key: KeyCode) {
        self.keys.insert(key);
    }

    pub fn set_key_up(&mut self, key: KeyCode) {
        self.keys.remove(&key);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_key_down_by_name(&self, name: &str) -> bool {
        KeyCode::from_name(name).is_some_and(|key| self.is_key_down(key))
    }
}

/// Non-blocking source of input, polled once per frame.
pub trait InputSource {
    /// Next pending event, or `None` when the queue is empty.
    fn poll_event(&mut self) -> Option<InputEvent>;

    /// Keyboard state as of the most recently polled event.
    fn keyboard(&self) -> &KeyboardState;
}

/// FIFO of events pushed by the windowing layer.
///
/// Key events update the keyboard snapshot when they are polled, so held
/// keys seen by a frame match the events that frame consumed.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<InputEvent>,
    keyboard: KeyboardState,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: InputEvent) {
        self.pending.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl InputSource for EventQueue {
    fn poll_event(&mut self) -> Option<InputEvent> {
        let event = self.pending.pop_front()?;
        match event {
            InputEvent::KeyDown(key) => self.keyboard.set_key_down(key),
            InputEvent::KeyUp(key) => self.keyboard.set_key_up(key),
            InputEvent::Quit | InputEvent::MouseMotion { .. } => {}
        }
        Some(event)
    }

    fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_character_keys() {
        assert_eq!(
            KeyCode::from_name("Escape"),
            Some(KeyCode::Named(NamedKey::Escape))
        );
        assert_eq!(KeyCode::from_name("e"), Some(KeyCode::Character('E')));
        assert_eq!(KeyCode::from_name("7"), Some(KeyCode::Digit(7)));
        assert_eq!(KeyCode::from_name("F12"), Some(KeyCode::Function(12)));
        assert_eq!(KeyCode::from_name("F26"), None);
        assert_eq!(KeyCode::from_name("Hyper"), None);
    }

    #[test]
    fn keyboard_state_tracks_keys() {
        let mut state = KeyboardState::new();
        state.set_key_down(KeyCode::Character('E'));
        assert!(state.is_key_down_by_name("E"));
        state.set_key_up(KeyCode::Character('E'));
        assert!(!state.is_key_down_by_name("E"));
    }

    #[test]
    fn small_motion_adds_up_across_deltas() {
        let mut motion = MotionAccumulator::new();
        assert_eq!(motion.accumulate(0.4, -0.3), None);
        assert_eq!(motion.accumulate(0.4, -0.3), None);
        assert_eq!(
            motion.accumulate(0.4, -0.3),
            Some(InputEvent::MouseMotion { dx: 1, dy: 0 })
        );

        let mut total = 0;
        for _ in 0..100 {
            if let Some(InputEvent::MouseMotion { dx, .. }) = motion.accumulate(-0.25, 0.0) {
                total += dx;
            }
        }
        assert_eq!(total, -25);
    }

    #[test]
    fn large_motion_keeps_its_fraction() {
        let mut motion = MotionAccumulator::new();
        assert_eq!(
            motion.accumulate(2.75, -1.5),
            Some(InputEvent::MouseMotion { dx: 2, dy: -1 })
        );
        assert_eq!(
            motion.accumulate(0.25, -0.5),
            Some(InputEvent::MouseMotion { dx: 1, dy: -1 })
        );
    }

    #[test]
    fn queue_applies_key_events_as_they_are_polled() {
        let mut queue = EventQueue::new();
        queue.push(InputEvent::KeyDown(KeyCode::Character('D')));
        queue.push(InputEvent::MouseMotion { dx: 3, dy: -1 });
        assert!(!queue.keyboard().is_key_down(KeyCode::Character('D')));

        assert_eq!(
            queue.poll_event(),
            Some(InputEvent::KeyDown(KeyCode::Character('D')))
        );
        assert!(queue.keyboard().is_key_down(KeyCode::Character('D')));
        assert_eq!(
            queue.poll_event(),
            Some(InputEvent::MouseMotion { dx: 3, dy: -1 })
        );
        assert_eq!(queue.poll_event(), None);
    }
}

use std::collections::VecDeque;

use glam::Vec2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// User intent, decoupled from the windowing layer that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputAction {
    MoveForward,
    MoveBackward,
    StrafeLeft,
    StrafeRight,
    ResetZoom,
    /// Left-drag between two cursor positions.
    Rotate { from: Vec2, to: Vec2 },
    /// Right-drag; only the vertical component moves the camera.
    Pan { dy: f32 },
    Scroll { offset: f32 },
    ToggleToon,
    ToggleSimplePatches,
    ToggleTerrainLighting,
    CycleGround,
    Quit,
}

/// Physical key, named the way the default bindings refer to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Character(char),
    Digit(u8),
    Escape,
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("escape") || name.eq_ignore_ascii_case("esc") {
            return Some(Self::Escape);
        }
        let mut chars = name.chars();
        let ch = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        if ch.is_ascii_alphabetic() {
            return Some(Self::Character(ch.to_ascii_uppercase()));
        }
        ch.to_digit(10).map(|digit| Self::Digit(digit as u8))
    }
}

/// Default key bindings. Returns `None` for keys without a binding.
pub fn action_for_key(key: KeyCode, shift: bool) -> Option<InputAction> {
    let action = match key {
        KeyCode::Escape => InputAction::Quit,
        KeyCode::Character('W') => InputAction::MoveForward,
        KeyCode::Character('S') => InputAction::MoveBackward,
        KeyCode::Character('A') => InputAction::StrafeLeft,
        KeyCode::Character('D') => InputAction::StrafeRight,
        KeyCode::Character('R') if !shift => InputAction::ResetZoom,
        KeyCode::Character('T') if shift => InputAction::CycleGround,
        KeyCode::Character('T') => InputAction::ToggleTerrainLighting,
        KeyCode::Digit(1) => InputAction::ToggleToon,
        KeyCode::Digit(2) => InputAction::ToggleSimplePatches,
        _ => return None,
    };
    Some(action)
}

/// Thread-safe queue of pending actions. Producers push from event
/// handlers; the frame loop drains it once per frame.
#[derive(Debug, Default)]
pub struct InputQueue {
    pending: Mutex<VecDeque<InputAction>>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: InputAction) {
        self.pending.lock().push_back(action);
    }

    pub fn push_key(&self, key: KeyCode, shift: bool) -> bool {
        match action_for_key(key, shift) {
            Some(action) => {
                self.push(action);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Takes every pending action in arrival order.
    pub fn drain(&self) -> Vec<InputAction> {
        self.pending.lock().drain(..).collect()
    }
}

/// Tracks held mouse buttons and the last cursor position so cursor moves
/// can be turned into drag actions.
#[derive(Debug, Clone, Default)]
pub struct DragTracker {
    left: bool,
    right: bool,
    cursor: Option<Vec2>,
}

impl DragTracker {
    pub fn set_left(&mut self, pressed: bool) {
        self.left = pressed;
    }

    pub fn set_right(&mut self, pressed: bool) {
        self.right = pressed;
    }

    /// Records a cursor move and returns the drag it represents, if any.
    /// The left button wins when both are held.
    pub fn cursor_moved(&mut self, position: Vec2) -> Option<InputAction> {
        let previous = self.cursor.replace(position)?;
        if self.left {
            Some(InputAction::Rotate {
                from: previous,
                to: position,
            })
        } else if self.right {
            Some(InputAction::Pan {
                dy: position.y - previous.y,
            })
        } else {
            None
        }
    }
}

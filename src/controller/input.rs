/// Platform-agnostic input state.
///
/// An external event pump feeds `InputEvent`s in; the game only ever reads
/// the resulting snapshot, once per frame.
use std::collections::HashSet;

use glam::DVec3;

use crate::model::body::ShipControls;
use crate::model::game::TimeAccel;

/// Axis values smaller than this are treated as centred
const JOYSTICK_DEADZONE: f32 = 0.1;

/// Platform-independent input events
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    // Keyboard events
    KeyDown(String),
    KeyUp(String),

    // Mouse events
    MouseMove { dx: f32, dy: f32 },
    MouseClick { button: MouseButton, is_down: bool },

    // Joystick events
    JoystickAdded { id: usize, axes: usize, buttons: usize },
    JoystickRemoved { id: usize },
    JoystickAxis { id: usize, axis: usize, value: f32 },
    JoystickButton { id: usize, button: usize, is_down: bool },

    // Window events
    FocusLost,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoystickState {
    pub axes: Vec<f32>,
    pub buttons: Vec<bool>,
}

impl JoystickState {
    pub fn new(axes: usize, buttons: usize) -> Self {
        Self { axes: vec![0.0; axes], buttons: vec![false; buttons] }
    }

    /// Axis value with the deadzone applied, 0 for unknown axes
    pub fn axis(&self, axis: usize) -> f32 {
        let value = self.axes.get(axis).copied().unwrap_or(0.0);
        if value.abs() < JOYSTICK_DEADZONE { 0.0 } else { value.clamp(-1.0, 1.0) }
    }

    pub fn button(&self, button: usize) -> bool {
        self.buttons.get(button).copied().unwrap_or(false)
    }
}

/// Key, mouse and joystick state. Reset whenever a game starts or ends.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub pressed_keys: HashSet<String>,
    pub look_delta: (f32, f32),
    pub left_click: bool,
    pub right_click: bool,
    pub joysticks: Vec<Option<JoystickState>>,
    pub joystick_enabled: bool,
    pub quit_requested: bool,
}

impl InputState {
    pub fn new(joystick_enabled: bool) -> Self {
        Self { joystick_enabled, ..Self::default() }
    }

    /// Process an input event and update state
    pub fn process_event(&mut self, event: &InputEvent) {
        match event {
            InputEvent::KeyDown(key) => {
                self.pressed_keys.insert(key.clone());
            }
            InputEvent::KeyUp(key) => {
                self.pressed_keys.remove(key.as_str());
            }
            InputEvent::MouseMove { dx, dy } => {
                self.look_delta.0 += dx;
                self.look_delta.1 += dy;
            }
            InputEvent::MouseClick { button, is_down } => match button {
                MouseButton::Left => self.left_click = *is_down,
                MouseButton::Right => self.right_click = *is_down,
                MouseButton::Middle => {}
            },
            InputEvent::JoystickAdded { id, axes, buttons } => {
                if !self.joystick_enabled {
                    return;
                }
                if self.joysticks.len() <= *id {
                    self.joysticks.resize(id + 1, None);
                }
                self.joysticks[*id] = Some(JoystickState::new(*axes, *buttons));
                tracing::info!(id, axes, buttons, "joystick connected");
            }
            InputEvent::JoystickRemoved { id } => {
                if let Some(slot) = self.joysticks.get_mut(*id) {
                    *slot = None;
                    tracing::info!(id, "joystick disconnected");
                }
            }
            InputEvent::JoystickAxis { id, axis, value } => {
                if let Some(stick) = self.joystick_mut(*id) {
                    if let Some(a) = stick.axes.get_mut(*axis) {
                        *a = *value;
                    }
                }
            }
            InputEvent::JoystickButton { id, button, is_down } => {
                if let Some(stick) = self.joystick_mut(*id) {
                    if let Some(b) = stick.buttons.get_mut(*button) {
                        *b = *is_down;
                    }
                }
            }
            InputEvent::FocusLost => {
                self.clear_keys();
            }
            InputEvent::Quit => {
                self.quit_requested = true;
            }
        }
    }

    fn joystick_mut(&mut self, id: usize) -> Option<&mut JoystickState> {
        self.joysticks.get_mut(id).and_then(|j| j.as_mut())
    }

    pub fn joystick(&self, id: usize) -> Option<&JoystickState> {
        self.joysticks.get(id).and_then(|j| j.as_ref())
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.pressed_keys.contains(key)
    }

    pub fn clear_keys(&mut self) {
        self.pressed_keys.clear();
    }

    pub fn consume_look(&mut self) -> (f32, f32) {
        let result = self.look_delta;
        self.look_delta = (0.0, 0.0);
        result
    }

    /// Drop all transient state but keep connected devices
    pub fn reset(&mut self) {
        self.pressed_keys.clear();
        self.look_delta = (0.0, 0.0);
        self.left_click = false;
        self.right_click = false;
        for stick in self.joysticks.iter_mut().flatten() {
            stick.axes.iter_mut().for_each(|a| *a = 0.0);
            stick.buttons.iter_mut().for_each(|b| *b = false);
        }
    }
}

/// Key mapping configuration
#[derive(Clone, Debug)]
pub struct KeyBindings {
    pub thrust_forward: String,
    pub thrust_backward: String,
    pub thrust_left: String,
    pub thrust_right: String,
    pub thrust_up: String,
    pub thrust_down: String,
    pub yaw_left: String,
    pub yaw_right: String,
    pub pitch_up: String,
    pub pitch_down: String,
    /// Keys selecting each time acceleration level, slowest first
    pub time_accel: [String; 6],
    pub request_dock: String,
    pub request_undock: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            thrust_forward: "w".to_string(),
            thrust_backward: "s".to_string(),
            thrust_left: "a".to_string(),
            thrust_right: "d".to_string(),
            thrust_up: "r".to_string(),
            thrust_down: "f".to_string(),
            yaw_left: "ArrowLeft".to_string(),
            yaw_right: "ArrowRight".to_string(),
            pitch_up: "ArrowUp".to_string(),
            pitch_down: "ArrowDown".to_string(),
            time_accel: ["Escape", "F1", "F2", "F3", "F4", "F5"].map(String::from),
            request_dock: "F6".to_string(),
            request_undock: "F7".to_string(),
        }
    }
}

/// High-level input processor
#[derive(Clone, Debug, Default)]
pub struct InputProcessor {
    bindings: KeyBindings,
}

impl InputProcessor {
    pub fn new(bindings: KeyBindings) -> Self {
        Self { bindings }
    }

    fn axis(&self, input: &InputState, positive: &str, negative: &str) -> f64 {
        let mut value = 0.0;
        if input.is_key_pressed(positive) {
            value += 1.0;
        }
        if input.is_key_pressed(negative) {
            value -= 1.0;
        }
        value
    }

    /// Ship controls from keys, plus the first joystick if there is one.
    /// Joystick axes 0/1 steer, 2 is forward thrust.
    pub fn ship_controls(&self, input: &InputState) -> ShipControls {
        let b = &self.bindings;
        let mut thrust = DVec3::new(
            self.axis(input, &b.thrust_right, &b.thrust_left),
            self.axis(input, &b.thrust_up, &b.thrust_down),
            // forward is -Z
            -self.axis(input, &b.thrust_forward, &b.thrust_backward),
        );
        let mut yaw = self.axis(input, &b.yaw_left, &b.yaw_right);
        let mut pitch = self.axis(input, &b.pitch_up, &b.pitch_down);

        if let Some(stick) = input.joysticks.iter().flatten().next() {
            yaw -= stick.axis(0) as f64;
            pitch -= stick.axis(1) as f64;
            thrust.z += stick.axis(2) as f64;
        }

        ShipControls {
            thrust: thrust.clamp(DVec3::splat(-1.0), DVec3::ONE),
            yaw: yaw.clamp(-1.0, 1.0),
            pitch: pitch.clamp(-1.0, 1.0),
        }
    }

    /// Acceleration level whose key is held, fastest wins
    pub fn requested_time_accel(&self, input: &InputState) -> Option<TimeAccel> {
        self.bindings
            .time_accel
            .iter()
            .zip(TimeAccel::ALL)
            .filter(|(key, _)| input.is_key_pressed(key))
            .map(|(_, accel)| accel)
            .max()
    }

    pub fn wants_dock(&self, input: &InputState) -> bool {
        input.is_key_pressed(&self.bindings.request_dock)
    }

    pub fn wants_undock(&self, input: &InputState) -> bool {
        input.is_key_pressed(&self.bindings.request_undock)
    }
}

//! Raw CDP input dispatch: trusted mouse and keyboard events.
//!
//! `Element::click` / `Tab::press_key` cover the happy path; these helpers
//! exist for the rungs that act without a resolved element handle
//! (coordinate clicks) or need modifier bookkeeping (key combos).

use std::sync::Arc;

use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Input;

use crate::error::{BrowserError, Result};

/// CDP modifier bitmask values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKey {
    Alt,
    Control,
    Meta,
    Shift,
}

impl ModifierKey {
    pub fn bit(self) -> u32 {
        match self {
            ModifierKey::Alt => 1,
            ModifierKey::Control => 2,
            ModifierKey::Meta => 4,
            ModifierKey::Shift => 8,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "alt" | "option" => Some(ModifierKey::Alt),
            "control" | "ctrl" => Some(ModifierKey::Control),
            "meta" | "cmd" | "command" | "win" => Some(ModifierKey::Meta),
            "shift" => Some(ModifierKey::Shift),
            _ => None,
        }
    }

    fn spec(self) -> KeySpec {
        match self {
            ModifierKey::Alt => KeySpec::raw("Alt", "AltLeft", 18),
            ModifierKey::Control => KeySpec::raw("Control", "ControlLeft", 17),
            ModifierKey::Meta => KeySpec::raw("Meta", "MetaLeft", 91),
            ModifierKey::Shift => KeySpec::raw("Shift", "ShiftLeft", 16),
        }
    }
}

/// One dispatchable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub key: String,
    pub code: String,
    pub virtual_key: u32,
    /// Present only for keys that insert text.
    pub text: Option<String>,
}

impl KeySpec {
    fn raw(key: &str, code: &str, virtual_key: u32) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            virtual_key,
            text: None,
        }
    }

    fn printable(key: &str, code: &str, virtual_key: u32, text: &str) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            virtual_key,
            text: Some(text.to_string()),
        }
    }
}

/// Resolve a key name ("Enter", "ArrowDown", "a") to its dispatch fields.
pub fn key_spec(name: &str) -> Result<KeySpec> {
    let spec = match name {
        "Enter" => KeySpec::printable("Enter", "Enter", 13, "\r"),
        "Tab" => KeySpec::raw("Tab", "Tab", 9),
        "Escape" | "Esc" => KeySpec::raw("Escape", "Escape", 27),
        "Backspace" => KeySpec::raw("Backspace", "Backspace", 8),
        "Delete" => KeySpec::raw("Delete", "Delete", 46),
        "ArrowUp" => KeySpec::raw("ArrowUp", "ArrowUp", 38),
        "ArrowDown" => KeySpec::raw("ArrowDown", "ArrowDown", 40),
        "ArrowLeft" => KeySpec::raw("ArrowLeft", "ArrowLeft", 37),
        "ArrowRight" => KeySpec::raw("ArrowRight", "ArrowRight", 39),
        "Home" => KeySpec::raw("Home", "Home", 36),
        "End" => KeySpec::raw("End", "End", 35),
        "PageUp" => KeySpec::raw("PageUp", "PageUp", 33),
        "PageDown" => KeySpec::raw("PageDown", "PageDown", 34),
        "Space" | " " => KeySpec::printable(" ", "Space", 32, " "),
        other => {
            let mut chars = other.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return Err(BrowserError::EvaluationFailed(format!(
                    "unknown key '{other}'"
                )));
            };
            if !c.is_ascii_graphic() {
                return Err(BrowserError::EvaluationFailed(format!(
                    "unknown key '{other}'"
                )));
            }
            let upper = c.to_ascii_uppercase();
            let code = if c.is_ascii_alphabetic() {
                format!("Key{upper}")
            } else if c.is_ascii_digit() {
                format!("Digit{c}")
            } else {
                String::new()
            };
            KeySpec::printable(&c.to_string(), &code, upper as u32, &c.to_string())
        }
    };
    Ok(spec)
}

/// Split `"Control+Shift+T"` into held modifiers (in order) and the main key.
pub fn parse_key_combo(combo: &str) -> Result<(Vec<ModifierKey>, KeySpec)> {
    let parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let (main, modifier_names) = parts
        .split_last()
        .ok_or_else(|| BrowserError::EvaluationFailed("empty key combo".to_string()))?;
    if main.is_empty() {
        return Err(BrowserError::EvaluationFailed(format!(
            "key combo '{combo}' has no main key"
        )));
    }

    let mut modifiers = Vec::with_capacity(modifier_names.len());
    for name in modifier_names {
        let modifier = ModifierKey::parse(name).ok_or_else(|| {
            BrowserError::EvaluationFailed(format!("unknown modifier '{name}' in '{combo}'"))
        })?;
        modifiers.push(modifier);
    }
    Ok((modifiers, key_spec(main)?))
}

fn dispatch_error(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::TabOperationFailed(format!("input dispatch failed: {e}"))
}

pub fn mouse_move(tab: &Arc<Tab>, x: f64, y: f64) -> Result<()> {
    tab.call_method(mouse_event(
        Input::DispatchMouseEventTypeOption::MouseMoved,
        x,
        y,
        None,
        None,
    ))
    .map_err(dispatch_error)?;
    Ok(())
}

/// Trusted left click at viewport coordinates: move, press, release.
pub fn mouse_click(tab: &Arc<Tab>, x: f64, y: f64) -> Result<()> {
    mouse_move(tab, x, y)?;
    tab.call_method(mouse_event(
        Input::DispatchMouseEventTypeOption::MousePressed,
        x,
        y,
        Some(Input::MouseButton::Left),
        Some(1),
    ))
    .map_err(dispatch_error)?;
    tab.call_method(mouse_event(
        Input::DispatchMouseEventTypeOption::MouseReleased,
        x,
        y,
        Some(Input::MouseButton::Left),
        Some(1),
    ))
    .map_err(dispatch_error)?;
    Ok(())
}

fn mouse_event(
    kind: Input::DispatchMouseEventTypeOption,
    x: f64,
    y: f64,
    button: Option<Input::MouseButton>,
    click_count: Option<u32>,
) -> Input::DispatchMouseEvent {
    Input::DispatchMouseEvent {
        Type: kind,
        x,
        y,
        modifiers: None,
        timestamp: None,
        button,
        buttons: None,
        click_count,
        force: None,
        tangential_pressure: None,
        tilt_x: None,
        tilt_y: None,
        twist: None,
        delta_x: None,
        delta_y: None,
        pointer_Type: None,
    }
}

pub fn key_down(tab: &Arc<Tab>, spec: &KeySpec, modifiers: u32) -> Result<()> {
    let kind = if spec.text.is_some() {
        Input::DispatchKeyEventTypeOption::KeyDown
    } else {
        Input::DispatchKeyEventTypeOption::RawKeyDown
    };
    tab.call_method(key_event(kind, spec, modifiers))
        .map_err(dispatch_error)?;
    Ok(())
}

pub fn key_up(tab: &Arc<Tab>, spec: &KeySpec, modifiers: u32) -> Result<()> {
    tab.call_method(key_event(
        Input::DispatchKeyEventTypeOption::KeyUp,
        spec,
        modifiers,
    ))
    .map_err(dispatch_error)?;
    Ok(())
}

/// Hold a modifier down. `modifiers` is the mask already held (excluding
/// this one).
pub fn modifier_down(tab: &Arc<Tab>, modifier: ModifierKey, modifiers: u32) -> Result<()> {
    key_down(tab, &modifier.spec(), modifiers | modifier.bit())
}

/// Release a modifier. `modifiers` is the mask still held after release.
pub fn modifier_up(tab: &Arc<Tab>, modifier: ModifierKey, modifiers: u32) -> Result<()> {
    key_up(tab, &modifier.spec(), modifiers)
}

fn key_event(
    kind: Input::DispatchKeyEventTypeOption,
    spec: &KeySpec,
    modifiers: u32,
) -> Input::DispatchKeyEvent {
    Input::DispatchKeyEvent {
        Type: kind,
        modifiers: Some(modifiers),
        timestamp: None,
        text: spec.text.clone(),
        unmodified_text: None,
        key_identifier: None,
        code: Some(spec.code.clone()),
        key: Some(spec.key.clone()),
        windows_virtual_key_code: Some(spec.virtual_key),
        native_virtual_key_code: Some(spec.virtual_key),
        auto_repeat: None,
        is_keypad: None,
        is_system_key: None,
        location: None,
        commands: None,
    }
}

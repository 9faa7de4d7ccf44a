//! Suppression policy: what the input hooks block.
//!
//! Key combinations are kept in canonical form, modifiers first in the fixed
//! order `ctrl, alt, shift, win`, followed by at most one non-modifier key.
//! Parsing is case-insensitive and accepts the usual aliases, so
//! `"Del+Alt+Control"` and `"ctrl+alt+del"` are the same combination.

use crate::error::{LockdownError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Win,
}

impl Modifier {
    pub const ALL: [Modifier; 4] = [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Win];

    fn bit(self) -> u8 {
        match self {
            Modifier::Ctrl => 0b0001,
            Modifier::Alt => 0b0010,
            Modifier::Shift => 0b0100,
            Modifier::Win => 0b1000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Win => "win",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" | "ctl" => Some(Modifier::Ctrl),
            "alt" | "option" | "menu" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "win" | "windows" | "super" | "meta" | "cmd" | "command" | "lwin" | "rwin" => {
                Some(Modifier::Win)
            }
            _ => None,
        }
    }
}

/// Set of held modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);

    pub fn with(mut self, m: Modifier) -> Self {
        self.insert(m);
        self
    }

    pub fn insert(&mut self, m: Modifier) {
        self.0 |= m.bit();
    }

    pub fn remove(&mut self, m: Modifier) {
        self.0 &= !m.bit();
    }

    pub fn contains(self, m: Modifier) -> bool {
        self.0 & m.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Modifier> {
        Modifier::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

const NAMED_KEYS: &[&str] = &[
    "tab", "esc", "space", "enter", "backspace", "del", "insert", "home", "end", "pageup",
    "pagedown", "left", "right", "up", "down", "printscreen", "pause", "capslock", "numlock",
    "scrolllock", "apps", "plus", "minus", "equals", "comma", "period", "slash", "backslash",
    "semicolon", "quote", "backquote", "lbracket", "rbracket",
];

/// Canonical name for a non-modifier key token, if it names a known key.
pub fn canonical_key_name(token: &str) -> Option<String> {
    let alias = match token {
        "delete" => "del",
        "escape" => "esc",
        "return" => "enter",
        "ins" => "insert",
        "pgup" | "page_up" | "prior" => "pageup",
        "pgdn" | "pgdown" | "page_down" | "next" => "pagedown",
        "prtsc" | "prtscr" | "print" | "snapshot" => "printscreen",
        "menu_key" | "context" => "apps",
        "bksp" => "backspace",
        "spacebar" => "space",
        other => other,
    };
    let mut chars = alias.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            return Some(c.to_ascii_lowercase().to_string());
        }
    }
    if let Some(n) = alias.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
        if (1..=24).contains(&n) {
            return Some(format!("f{n}"));
        }
    }
    NAMED_KEYS
        .iter()
        .find(|k| **k == alias)
        .map(|k| k.to_string())
}

/// A key combination such as `ctrl+alt+del`, or a modifier-only chord (`win`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCombo {
    modifiers: Modifiers,
    key: Option<String>,
}

impl KeyCombo {
    pub fn new(modifiers: Modifiers, key: Option<String>) -> Self {
        Self { modifiers, key }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let lowered = input.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Err(LockdownError::Configuration("empty key combination".into()));
        }
        let mut modifiers = Modifiers::NONE;
        let mut key: Option<String> = None;
        for token in lowered.split('+').map(str::trim) {
            if token.is_empty() {
                return Err(LockdownError::Configuration(format!(
                    "malformed key combination '{input}'"
                )));
            }
            if let Some(m) = Modifier::parse(token) {
                modifiers.insert(m);
                continue;
            }
            let name = canonical_key_name(token).ok_or_else(|| {
                LockdownError::Configuration(format!("unknown key '{token}' in '{input}'"))
            })?;
            if key.replace(name).is_some() {
                return Err(LockdownError::Configuration(format!(
                    "'{input}' names more than one non-modifier key"
                )));
            }
        }
        Ok(Self { modifiers, key })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = self.modifiers.iter().map(Modifier::name).collect();
        if let Some(key) = &self.key {
            parts.push(key);
        }
        f.write_str(&parts.join("+"))
    }
}

impl std::str::FromStr for KeyCombo {
    type Err = LockdownError;

    fn from_str(s: &str) -> Result<Self> {
        KeyCombo::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDecision {
    Block,
    AdminOverride,
    Allow,
}

/// Blocked key combinations plus the reserved admin-override combination.
///
/// The admin combination can never enter the blocked list: it is filtered on
/// construction and rejected by [`KeyboardPolicy::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardPolicy {
    blocked: Vec<KeyCombo>,
    admin: KeyCombo,
}

impl KeyboardPolicy {
    pub fn new<I, S>(admin: &str, blocked: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let admin = KeyCombo::parse(admin)?;
        let mut policy = Self {
            blocked: Vec::new(),
            admin,
        };
        policy.replace_blocked(blocked)?;
        Ok(policy)
    }

    /// Replaces the blocked list. Nothing changes unless every entry parses.
    pub fn replace_blocked<I, S>(&mut self, blocked: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next: Vec<KeyCombo> = Vec::new();
        for entry in blocked {
            let combo = KeyCombo::parse(entry.as_ref())?;
            if combo != self.admin && !next.contains(&combo) {
                next.push(combo);
            }
        }
        self.blocked = next;
        Ok(())
    }

    /// Returns whether the combination was newly added.
    pub fn add(&mut self, identifier: &str) -> Result<bool> {
        let combo = KeyCombo::parse(identifier)?;
        if combo == self.admin {
            return Err(LockdownError::Configuration(format!(
                "'{combo}' is the reserved admin-override combination"
            )));
        }
        if self.blocked.contains(&combo) {
            return Ok(false);
        }
        self.blocked.push(combo);
        Ok(true)
    }

    /// Returns whether an entry was removed. Missing entries are a no-op.
    pub fn remove(&mut self, identifier: &str) -> Result<bool> {
        let combo = KeyCombo::parse(identifier)?;
        let before = self.blocked.len();
        self.blocked.retain(|c| *c != combo);
        Ok(self.blocked.len() != before)
    }

    pub fn decide(&self, combo: &KeyCombo) -> KeyDecision {
        if *combo == self.admin {
            KeyDecision::AdminOverride
        } else if self.blocked.contains(combo) {
            KeyDecision::Block
        } else {
            KeyDecision::Allow
        }
    }

    pub fn blocked(&self) -> &[KeyCombo] {
        &self.blocked
    }

    pub fn blocked_names(&self) -> Vec<String> {
        self.blocked.iter().map(ToString::to_string).collect()
    }

    pub fn admin(&self) -> &KeyCombo {
        &self.admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

impl PointerButton {
    pub const ALL: [PointerButton; 5] = [
        PointerButton::Left,
        PointerButton::Right,
        PointerButton::Middle,
        PointerButton::X1,
        PointerButton::X2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PointerButton::Left => "left",
            PointerButton::Right => "right",
            PointerButton::Middle => "middle",
            PointerButton::X1 => "x1",
            PointerButton::X2 => "x2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PointerButton::Left => "Left Click",
            PointerButton::Right => "Right Click",
            PointerButton::Middle => "Middle Click",
            PointerButton::X1 => "Side Button X1",
            PointerButton::X2 => "Side Button X2",
        }
    }

    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Resolves a button name. `side` and `custom` name both X-buttons.
    pub fn parse_many(name: &str) -> Result<Vec<PointerButton>> {
        let buttons = match name.trim().to_ascii_lowercase().as_str() {
            "left" | "primary" => vec![PointerButton::Left],
            "right" | "secondary" => vec![PointerButton::Right],
            "middle" | "wheel" => vec![PointerButton::Middle],
            "x1" | "back" | "mouse4" | "xbutton1" => vec![PointerButton::X1],
            "x2" | "forward" | "mouse5" | "xbutton2" => vec![PointerButton::X2],
            "side" | "custom" | "x" => vec![PointerButton::X1, PointerButton::X2],
            _ => {
                return Err(LockdownError::Configuration(format!(
                    "unknown pointer button '{name}'"
                )))
            }
        };
        Ok(buttons)
    }
}

/// Blocked pointer buttons. `block_all` overrides the individual entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointerPolicy {
    blocked: BTreeSet<PointerButton>,
    block_all: bool,
}

impl PointerPolicy {
    pub fn new<I, S>(blocked: I, block_all: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in blocked {
            set.extend(PointerButton::parse_many(name.as_ref())?);
        }
        Ok(Self {
            blocked: set,
            block_all,
        })
    }

    /// Returns the buttons that were newly added.
    pub fn add(&mut self, name: &str) -> Result<Vec<PointerButton>> {
        let buttons = PointerButton::parse_many(name)?;
        Ok(buttons.into_iter().filter(|b| self.blocked.insert(*b)).collect())
    }

    /// Returns the buttons that were removed.
    pub fn remove(&mut self, name: &str) -> Result<Vec<PointerButton>> {
        let buttons = PointerButton::parse_many(name)?;
        Ok(buttons.into_iter().filter(|b| self.blocked.remove(b)).collect())
    }

    pub fn set_block_all(&mut self, block_all: bool) {
        self.block_all = block_all;
    }

    /// Left and right stay usable; middle and both side buttons are blocked.
    pub fn allow_basic_clicks(&mut self) {
        self.block_all = false;
        self.blocked = [PointerButton::Middle, PointerButton::X1, PointerButton::X2]
            .into_iter()
            .collect();
    }

    pub fn blocks(&self, button: PointerButton) -> bool {
        self.block_all || self.blocked.contains(&button)
    }

    pub fn block_all(&self) -> bool {
        self.block_all
    }

    pub fn blocked(&self) -> impl Iterator<Item = PointerButton> + '_ {
        self.blocked.iter().copied()
    }

    pub fn blocked_names(&self) -> Vec<String> {
        self.blocked.iter().map(|b| b.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combos_are_canonical_and_case_insensitive() {
        let a = KeyCombo::parse("Del+Alt+Control").unwrap();
        let b = KeyCombo::parse("ctrl+alt+delete").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ctrl+alt+del");
        assert_eq!(KeyCombo::parse("WIN+Tab").unwrap().to_string(), "win+tab");
        assert_eq!(KeyCombo::parse("F11").unwrap().to_string(), "f11");
        assert_eq!(KeyCombo::parse("shift+ctrl").unwrap().to_string(), "ctrl+shift");
    }

    #[test]
    fn malformed_combos_are_rejected() {
        for bad in ["", "ctrl+", "ctrl++a", "ctrl+a+b", "hyper+a", "f25"] {
            assert!(
                matches!(KeyCombo::parse(bad), Err(LockdownError::Configuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn admin_combo_never_enters_blocked_set() {
        let mut policy =
            KeyboardPolicy::new("ctrl+shift+y", ["alt+tab", "CTRL+SHIFT+Y", "alt+f4"]).unwrap();
        assert_eq!(policy.blocked_names(), vec!["alt+tab", "alt+f4"]);

        assert!(policy.add("shift+ctrl+y").is_err());
        assert!(!policy.blocked().contains(policy.admin()));
        assert_eq!(
            policy.decide(&KeyCombo::parse("ctrl+shift+y").unwrap()),
            KeyDecision::AdminOverride
        );
    }

    #[test]
    fn add_remove_are_idempotent() {
        let mut policy = KeyboardPolicy::new("ctrl+shift+y", ["alt+tab"]).unwrap();
        assert!(policy.add("ctrl+alt+del").unwrap());
        assert!(!policy.add("Ctrl+Alt+Delete").unwrap());
        assert!(policy.remove("alt+tab").unwrap());
        assert!(!policy.remove("alt+tab").unwrap());
        assert_eq!(policy.blocked_names(), vec!["ctrl+alt+del"]);
        assert!(policy.add("bogus+key").is_err());
        assert_eq!(policy.blocked().len(), 1);
    }

    #[test]
    fn replace_is_all_or_nothing() {
        let mut policy = KeyboardPolicy::new("ctrl+shift+y", ["alt+tab"]).unwrap();
        assert!(policy.replace_blocked(["win+d", "nonsense+q"]).is_err());
        assert_eq!(policy.blocked_names(), vec!["alt+tab"]);
    }

    #[test]
    fn side_alias_expands_to_both_x_buttons() {
        let policy = PointerPolicy::new(["middle", "side"], false).unwrap();
        assert_eq!(policy.blocked_names(), vec!["middle", "x1", "x2"]);
        assert!(!policy.blocks(PointerButton::Left));
        assert!(!policy.blocks(PointerButton::Right));
    }

    #[test]
    fn block_all_overrides_entries() {
        let mut policy = PointerPolicy::new(Vec::<String>::new(), false).unwrap();
        policy.set_block_all(true);
        for button in PointerButton::ALL {
            assert!(policy.blocks(button));
        }
        policy.allow_basic_clicks();
        assert!(!policy.block_all());
        assert!(!policy.blocks(PointerButton::Left));
        assert!(policy.blocks(PointerButton::X2));
    }

    #[test]
    fn unknown_button_is_rejected_without_change() {
        let mut policy = PointerPolicy::new(["middle"], false).unwrap();
        assert!(policy.add("thumb").is_err());
        assert_eq!(policy.remove("x1").unwrap(), vec![]);
        assert_eq!(policy.blocked_names(), vec!["middle"]);
    }
}

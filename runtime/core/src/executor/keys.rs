//! Key combo parsing: `"Ctrl + Alt + T"` into modifiers plus one main key.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use super::ActionError;

pub const COMBO_SEPARATOR: char = '+';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    /// Expects a lowercased token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" | "ctl" => Some(Modifier::Ctrl),
            "alt" | "option" | "opt" | "altgr" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "cmd" | "command" | "super" | "win" | "windows" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Meta => "meta",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCombo {
    pub modifiers: BTreeSet<Modifier>,
    /// Lowercased main key name, e.g. `t`, `space`, `f5`.
    pub key: String,
}

impl ParsedCombo {
    pub fn has(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

impl fmt::Display for ParsedCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{modifier} + ")?;
        }
        f.write_str(&self.key)
    }
}

/// Total parse: every input yields a combo or `NoKeyResolved`.
///
/// Tokens are case-insensitive. Any token that is not a modifier word becomes
/// the main key if none has been set yet; later extra keys are ignored.
pub fn parse_combo(input: &str) -> Result<ParsedCombo, ActionError> {
    let mut modifiers = BTreeSet::new();
    let mut key: Option<String> = None;

    let tokens = input
        .split(COMBO_SEPARATOR)
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty());

    for token in tokens {
        if let Some(modifier) = Modifier::from_token(&token) {
            modifiers.insert(modifier);
        } else if key.is_none() {
            key = Some(token);
        } else {
            debug!(combo = input, ignored = %token, "combo has more than one main key");
        }
    }

    match key {
        Some(key) => Ok(ParsedCombo { modifiers, key }),
        None => Err(ActionError::NoKeyResolved(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_and_main_key() {
        let combo = parse_combo("Ctrl + Alt + T").expect("combo");
        assert_eq!(
            combo.modifiers,
            BTreeSet::from([Modifier::Ctrl, Modifier::Alt])
        );
        assert_eq!(combo.key, "t");
    }

    #[test]
    fn single_named_key() {
        let combo = parse_combo("Space").expect("combo");
        assert!(combo.modifiers.is_empty());
        assert_eq!(combo.key, "space");
    }

    #[test]
    fn only_modifiers_resolve_no_key() {
        let err = parse_combo("Ctrl + Shift").unwrap_err();
        assert_eq!(err, ActionError::NoKeyResolved("Ctrl + Shift".into()));
    }

    #[test]
    fn empty_input_resolves_no_key() {
        assert!(matches!(
            parse_combo("   "),
            Err(ActionError::NoKeyResolved(_))
        ));
        assert!(matches!(parse_combo(" + "), Err(ActionError::NoKeyResolved(_))));
    }

    #[test]
    fn unknown_word_becomes_main_key_once() {
        let combo = parse_combo("hyper + Q + W").expect("combo");
        assert!(combo.modifiers.is_empty());
        assert_eq!(combo.key, "hyper");
    }

    #[test]
    fn case_and_spacing_are_ignored() {
        let combo = parse_combo("cTrL+sHiFt+Esc").expect("combo");
        assert!(combo.has(Modifier::Ctrl));
        assert!(combo.has(Modifier::Shift));
        assert_eq!(combo.to_string(), "ctrl + shift + esc");
    }
}

//! Driver Name Parsing
//!
//! The simulation reports names with inline `^N` color codes and, before a
//! player's identity is known, with synthetic placeholders such as `PLID 7`.
//! Everything here is pure string work shared by the registry and reconciler.

use crate::leaderboard::entity::EntityId;

/// Accent colors for the `^0`..`^7` codes. Other codes carry no color.
pub const CARET_COLORS: [&str; 8] = [
    "#000000", // ^0 black
    "#ff3333", // ^1 red
    "#33ff66", // ^2 green
    "#ffd633", // ^3 yellow
    "#3399ff", // ^4 blue
    "#ff66cc", // ^5 magenta
    "#33ffff", // ^6 cyan
    "#ffffff", // ^7 white
];

/// Build the placeholder shown for an entity with no resolved identity.
pub fn placeholder_name(id: EntityId) -> String {
    format!("PLID {}", id)
}

/// Remove all `^X` color codes (X a hex digit) and NUL bytes, then trim.
pub fn strip_color_codes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '^' if chars.peek().is_some_and(|n| n.is_ascii_hexdigit()) => {
                chars.next();
            }
            '\0' => {}
            _ => out.push(c),
        }
    }

    out.trim().to_string()
}

/// Accent color of the last color code in the raw name, if it maps to one.
pub fn last_color(raw: &str) -> Option<&'static str> {
    let bytes = raw.as_bytes();
    let last_code = bytes
        .windows(2)
        .filter(|w| w[0] == b'^' && w[1].is_ascii_hexdigit())
        .map(|w| w[1])
        .last()?;

    let index = (last_code as char).to_digit(16)? as usize;
    CARET_COLORS.get(index).copied()
}

/// Match `<prefix><optional whitespace><digits>` case-insensitively.
///
/// With `allow_suffix`, anything may follow the digits.
fn matches_numbered(name: &str, prefix: &str, allow_suffix: bool) -> bool {
    let s = name.trim();
    if s.len() < prefix.len() || !s.is_char_boundary(prefix.len()) {
        return false;
    }
    let (head, rest) = s.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return false;
    }

    let rest = rest.trim_start();
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    allow_suffix || digits == rest.len()
}

/// Low-information names that say nothing about who is driving.
pub fn is_placeholder_name(name: &str) -> bool {
    name.trim().is_empty()
        || matches_numbered(name, "PLID", false)
        || matches_numbered(name, "Player", false)
        || matches_numbered(name, "Car", false)
}

/// The bare `PLID <n>` row the simulation reports for an unfilled grid slot.
pub fn is_plid_shadow(name: &str) -> bool {
    matches_numbered(name, "PLID", false)
}

/// AI-controlled entries (`AI 3`, `AI 12 (Bob)`).
pub fn is_ai_name(name: &str) -> bool {
    matches_numbered(name, "AI", true)
}

/// Case-folded, trimmed key used to merge rows for the same driver name.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_color_codes() {
        assert_eq!(strip_color_codes("^1Red^7Bull"), "RedBull");
        assert_eq!(strip_color_codes("  ^4Blue\0 "), "Blue");
        assert_eq!(strip_color_codes("^^1x"), "^x");
        assert_eq!(strip_color_codes("no codes"), "no codes");
        // ^L is a charset switch, not a color code
        assert_eq!(strip_color_codes("^Lname"), "^Lname");
    }

    #[test]
    fn test_last_color() {
        assert_eq!(last_color("^1Red^4Blue"), Some("#3399ff"));
        assert_eq!(last_color("^7White"), Some("#ffffff"));
        assert_eq!(last_color("^9Grey"), None);
        assert_eq!(last_color("plain"), None);
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder_name(""));
        assert!(is_placeholder_name("PLID 12"));
        assert!(is_placeholder_name("plid12"));
        assert!(is_placeholder_name("Player 3"));
        assert!(is_placeholder_name("car 7"));
        assert!(!is_placeholder_name("Carlos"));
        assert!(!is_placeholder_name("PLID"));
        assert!(!is_placeholder_name("Player 3 Jr"));
        assert!(!is_placeholder_name("AI 4"));
    }

    #[test]
    fn test_shadow_and_ai() {
        assert!(is_plid_shadow(" PLID 4 "));
        assert!(!is_plid_shadow("Player 4"));
        assert!(is_ai_name("AI 2"));
        assert!(is_ai_name("ai7 (Bob)"));
        assert!(!is_ai_name("Aidan"));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Max Power "), "max power");
        assert_eq!(placeholder_name(EntityId(9)), "PLID 9");
    }
}

//! Maps free-text location hints to section ids.

use super::document::{INTRODUCTION_ID, SUMMARY_ID};

const INTRODUCTION_ALIASES: &[&str] = &[
    "intro",
    "introduction",
    "opening",
    "beginning",
    "start",
    "введение",
    "вступление",
    "начало",
];

const SUMMARY_ALIASES: &[&str] = &[
    "conclusion",
    "summary",
    "outro",
    "ending",
    "end",
    "recap",
    "wrap_up",
    "заключение",
    "итог",
    "итоги",
    "резюме",
];

const SECTION_PREFIXES: &[&str] = &["section", "sec", "раздел"];

/// Resolves a location hint to a canonical section id.
///
/// Returns `None` for document-scope hints ("global", "examples", ...) and
/// anything unrecognized; such edits go to whole-lesson regeneration.
pub fn location_to_section_id(location: &str) -> Option<String> {
    let normalized = location
        .trim()
        .to_lowercase()
        .replace(['-', ' '], "_");

    if INTRODUCTION_ALIASES.contains(&normalized.as_str()) {
        return Some(INTRODUCTION_ID.to_string());
    }
    if SUMMARY_ALIASES.contains(&normalized.as_str()) {
        return Some(SUMMARY_ID.to_string());
    }

    SECTION_PREFIXES.iter().find_map(|prefix| {
        let rest = normalized.strip_prefix(prefix)?;
        let digits = rest.strip_prefix('_').unwrap_or(rest);
        match digits.parse::<u32>() {
            Ok(n) if n >= 1 && digits.chars().all(|c| c.is_ascii_digit()) => {
                Some(format!("section_{}", n))
            }
            _ => None,
        }
    })
}

//! Cleanup of raw model output.
//!
//! Local model runners write terminal decoration into their output: ANSI
//! escape sequences, spinner frames and markdown fences. None of it is SQL.

use std::sync::OnceLock;

use regex::Regex;

/// Braille frames drawn by terminal spinners.
const SPINNER_GLYPHS: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

fn escape_sequences() -> &'static Regex {
    static ESCAPES: OnceLock<Regex> = OnceLock::new();
    ESCAPES.get_or_init(|| {
        // CSI, OSC (BEL or ST terminated), then any other two-byte escape.
        Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)?|\x1B[@-_]")
            .expect("valid regex")
    })
}

fn code_fences() -> &'static Regex {
    static FENCES: OnceLock<Regex> = OnceLock::new();
    FENCES.get_or_init(|| Regex::new(r"(?i)```(?:sql)?").expect("valid regex"))
}

/// Strips terminal control sequences, spinner glyphs and code fences from
/// `raw`, then trims surrounding whitespace.
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    let text = escape_sequences().replace_all(raw, "");
    let text: String = text
        .chars()
        .filter(|c| !SPINNER_GLYPHS.contains(c))
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect();
    // Fences can only be split by removed characters, so this runs last.
    code_fences().replace_all(&text, "").trim().to_string()
}

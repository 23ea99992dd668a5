//! Turns raw backend output into user-facing status lines.

use std::sync::LazyLock;

use regex::Regex;

/// Prefixes stripped from the front of a line, matched case-insensitively and
/// repeatedly (`"[stdout] INFO: Processing x"` loses all three).
const NOISE_PREFIXES: &[&str] = &[
    "[stdout]",
    "[stderr]",
    "INFO:",
    "WARN:",
    "ERROR:",
    "Processing ",
    "Decompiling ",
    "Extracting ",
];

const NOISE_SUFFIXES: &[&str] = &["... done"];

/// Substrings that mark internal backend diagnostics.
const DENY_LIST: &[&str] = &[
    "[ignored]",
    "TRYBLOCK",
    "stack info",
    "Produces",
    "ASTORE",
    "targets",
    "WARN jadx",
    "ERROR jadx",
    "thread-1",
    "JadxRuntimeException",
    "java.lang",
];

/// Identifier-like text: no leading punctuation, no diagnostics punctuation.
static PROGRESS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9$_][A-Za-z0-9$_/;.\- ]*$").expect("valid regex"));

/// Cleans one raw output line. `None` means the line is dropped.
pub fn normalize_line(raw: &str) -> Option<String> {
    let mut line = raw.trim_matches(|c: char| c == '\r' || c == '\n').trim();

    loop {
        let Some(rest) = NOISE_PREFIXES
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(line, prefix))
        else {
            break;
        };
        line = rest.trim_start();
    }
    for suffix in NOISE_SUFFIXES {
        if let Some(rest) = line.strip_suffix(suffix) {
            line = rest;
        }
    }
    let line = line.trim();

    if line.is_empty() || is_denied(line) {
        return None;
    }
    if !PROGRESS_LINE.is_match(line) {
        return None;
    }
    Some(line.to_string())
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

fn is_denied(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    DENY_LIST
        .iter()
        .any(|part| lowered.contains(&part.to_ascii_lowercase()))
}

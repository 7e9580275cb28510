//! Numbered-list parsing for completion responses.

use std::sync::OnceLock;

use regex::Regex;

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\s*.+").expect("numbered-line pattern is valid"))
}

/// Extract candidate goals from `N. <text>` lines.
///
/// Lines are trimmed first. Anything not matching is dropped, and so is a
/// numbered line whose text is blank after trimming.
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| numbered_line().is_match(line))
        .filter_map(|line| {
            let (_, rest) = line.split_once('.')?;
            let goal = rest.trim();
            (!goal.is_empty()).then(|| goal.to_string())
        })
        .collect()
}

pub mod time;

/// Escape character used with `LIKE ... ESCAPE '!'`.
pub const LIKE_ESCAPE: char = '!';

pub fn escape_like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out
}

/// Trims a free-text filter and drops control characters. Empty input yields `None`.
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    let s: String = raw?.chars().filter(|c| !c.is_control()).collect();
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

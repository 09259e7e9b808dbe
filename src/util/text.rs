use std::borrow::Cow;

/// Ellipsis appended when text is truncated.
const ELLIPSIS: &str = "...";

/// Collapses runs of whitespace (including newlines and tabs) into single
/// spaces and trims the ends.
///
/// Returns `Cow::Borrowed` when the input is already collapsed (common for
/// short titles), avoiding an allocation on the hot extraction path.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();

    let mut prev_space = false;
    let needs_collapse = trimmed.chars().any(|c| {
        let ws = c.is_whitespace();
        let run = ws && (prev_space || c != ' ');
        prev_space = ws;
        run
    });

    if !needs_collapse {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut in_ws = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    Cow::Owned(out)
}

/// Truncates a string to at most `max_chars` characters, appending an
/// ellipsis when anything was cut. Counts `char`s, not bytes, so multi-byte
/// text never splits mid-codepoint.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let cut: String = s.chars().take(keep).collect();
    Cow::Owned(format!("{}{}", cut.trim_end(), ELLIPSIS))
}

/// Strips HTML tags from a fragment, decoding the handful of entities that
/// show up in feed descriptions. Good enough for plain-text summaries; this
/// is not an HTML sanitizer.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;

    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    collapse_whitespace(&decoded).into_owned()
}

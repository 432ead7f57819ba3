//! # Text Processing Utilities
//!
//! Placeholder rendering for message templates and width-aware helpers used by
//! the terminal renderer.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("placeholder pattern is valid"));

/// Substitutes `{name}` placeholders using the supplied lookup.
///
/// Placeholders without a value are left in place so that a missing argument
/// stays visible in the rendered message instead of silently disappearing.
///
/// ```rust
/// use gcpdiag_util::render_placeholders;
///
/// let rendered = render_placeholders("VM {name} is {status}", |key| match key {
///     "name" => Some("vm-1".to_string()),
///     _ => None,
/// });
/// assert_eq!(rendered, "VM vm-1 is {status}");
/// ```
pub fn render_placeholders<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(template, |captures: &Captures| {
            let key = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            lookup(key).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Wraps `text` to `width` columns, prefixing every line with `indent`.
///
/// Existing line breaks are preserved; each paragraph is wrapped on its own.
pub fn wrap_indented(text: &str, width: usize, indent: &str) -> String {
    let width = width.max(indent.width() + 10);
    let options = textwrap::Options::new(width)
        .initial_indent(indent)
        .subsequent_indent(indent);
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                textwrap::fill(line, &options)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncates `text` so that its display width does not exceed `width`,
/// appending an ellipsis when anything was cut.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }

    let mut truncated = String::new();
    let mut used = 0;
    for character in text.chars() {
        let char_width = character.width().unwrap_or(0);
        if used + char_width + 1 > width {
            break;
        }
        truncated.push(character);
        used += char_width;
    }
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_known_placeholders() {
        let rendered = render_placeholders("{ project } / { zone }", |key| Some(key.to_uppercase()));
        assert_eq!(rendered, "PROJECT / ZONE");
    }

    #[test]
    fn wraps_with_indent() {
        let wrapped = wrap_indented("one two three four five six seven eight nine ten eleven twelve", 24, "   ");
        assert!(wrapped.lines().count() > 1);
        assert!(wrapped.lines().all(|line| line.starts_with("   ")));
    }

    #[test]
    fn keeps_blank_lines_between_paragraphs() {
        let wrapped = wrap_indented("first\n\nsecond", 40, "  ");
        assert_eq!(wrapped, "  first\n\n  second");
    }

    #[test]
    fn truncates_by_display_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let truncated = truncate_to_width("a very long progress line", 10);
        assert_eq!(truncated.width(), 10);
        assert!(truncated.ends_with('…'));
    }
}

//! Type-directed sanitization of validated field values.
//!
//! HTML passes through a tag/attribute allow-list scanner; URLs and
//! emails are canonicalized; colors are normalized to `#rrggbb`; plain
//! text is stripped of markup. Sanitization is assignment-shaped: running
//! it twice yields the same output as running it once.

use crate::ledger::FieldType;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Tags kept in HTML fields (everything else is unwrapped or dropped).
const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "i", "u", "em", "strong", "p", "br", "hr", "ul", "ol", "li", "h1", "h2", "h3", "h4",
    "h5", "h6", "blockquote", "span", "img", "code", "pre",
];

/// Tags removed together with their entire content.
const DROP_CONTENT_TAGS: &[&str] = &["script", "style", "iframe", "object", "embed"];

/// `<[/]name attrs...>` anchored at the start of the remaining input.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)((?:[^>"']|"[^"]*"|'[^']*')*?)\s*/?>"#)
        .unwrap()
});

/// Valued attributes inside a tag body.
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z][a-zA-Z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});

/// Sanitize one validated value according to its field type.
pub fn sanitize(value: &str, field_type: FieldType) -> String {
    match field_type {
        FieldType::Text => scan_markup(value, false),
        FieldType::Html => scan_markup(value, true),
        FieldType::Url => canonicalize_url(value),
        FieldType::Email => canonicalize_email(value),
        FieldType::Color => normalize_color(value),
    }
}

fn canonicalize_url(value: &str) -> String {
    let trimmed = value.trim();
    match Url::parse(trimmed) {
        Ok(url) => url.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

fn canonicalize_email(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_ascii_lowercase()),
        None => trimmed.to_string(),
    }
}

fn normalize_color(value: &str) -> String {
    let digits = value.trim().trim_start_matches('#').to_ascii_lowercase();
    if digits.len() == 3 {
        let mut expanded = String::with_capacity(6);
        for c in digits.chars() {
            expanded.push(c);
            expanded.push(c);
        }
        format!("#{expanded}")
    } else {
        format!("#{digits}")
    }
}

/// Scan markup, either keeping allow-listed tags (`keep_allowed`) or
/// stripping every tag. Content of DROP_CONTENT_TAGS is removed in both
/// modes; text between other tags is always kept.
fn scan_markup(input: &str, keep_allowed: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let Some(caps) = TAG_RE.captures(rest) else {
            // Stray '<' that never forms a tag: keep it as text.
            out.push('<');
            rest = &rest[1..];
            continue;
        };

        let whole_len = caps.get(0).map(|m| m.end()).unwrap_or(1);
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let attrs = caps.get(3).map_or("", |m| m.as_str());
        rest = &rest[whole_len..];

        if DROP_CONTENT_TAGS.contains(&name.as_str()) {
            if !closing {
                rest = skip_past_close_tag(rest, &name);
            }
            continue;
        }

        if keep_allowed && ALLOWED_TAGS.contains(&name.as_str()) {
            if closing {
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            } else {
                out.push('<');
                out.push_str(&name);
                out.push_str(&clean_attrs(&name, attrs));
                out.push('>');
            }
        }
        // Disallowed tag: dropped, its inner content survives.
    }

    out.push_str(rest);
    out
}

/// Advance past `</name ...>`, or to the end if it never closes.
fn skip_past_close_tag<'a>(rest: &'a str, name: &str) -> &'a str {
    let bytes = rest.as_bytes();
    let needle = name.as_bytes();
    let mut i = 0;
    while i + needle.len() + 2 <= bytes.len() {
        if bytes[i] == b'<'
            && bytes[i + 1] == b'/'
            && bytes[i + 2..i + 2 + needle.len()].eq_ignore_ascii_case(needle)
        {
            return match rest[i..].find('>') {
                Some(g) => &rest[i + g + 1..],
                None => "",
            };
        }
        i += 1;
    }
    ""
}

/// Rebuild a tag's attribute list keeping only allow-listed, non-handler
/// attributes with safe schemes.
fn clean_attrs(tag: &str, attrs: &str) -> String {
    let mut out = String::new();
    for caps in ATTR_RE.captures_iter(attrs) {
        let attr = caps[1].to_ascii_lowercase();
        if attr.starts_with("on") {
            continue;
        }
        let allowed = matches!(
            (tag, attr.as_str()),
            ("a", "href" | "title" | "target" | "rel")
                | ("img", "src" | "alt" | "title" | "width" | "height")
                | (_, "class")
        );
        if !allowed {
            continue;
        }

        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());

        if matches!(attr.as_str(), "href" | "src") && has_executable_scheme(value) {
            continue;
        }

        out.push(' ');
        out.push_str(&attr);
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    out
}

/// True for `javascript:`/`vbscript:`/`data:` URLs, including obfuscation
/// via embedded whitespace or control characters.
fn has_executable_scheme(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:")
        || compact.starts_with("vbscript:")
        || compact.starts_with("data:")
}

// ── Tests ───────────────────────────────────────────────────────

//! Logical `/`-delimited paths inside a container file.
//!
//! Names may contain any character. `\` is reserved as the escape character: a literal `/` in a
//! name is stored as `\s` and a literal `\` as `\\`, so splitting on `/` is always safe.

pub const SEPARATOR: char = '/';
pub const ESCAPE: char = '\\';
pub const ROOT: &str = "/";

/// Escape a single name so it can be used as one path segment.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            ESCAPE => {
                out.push(ESCAPE);
                out.push(ESCAPE);
            }
            SEPARATOR => {
                out.push(ESCAPE);
                out.push('s');
            }
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_name`]. Unknown escape sequences are kept verbatim.
pub fn unescape_name(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch != ESCAPE {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(ESCAPE) => out.push(ESCAPE),
            Some('s') => out.push(SEPARATOR),
            Some(other) => {
                out.push(ESCAPE);
                out.push(other);
            }
            None => out.push(ESCAPE),
        }
    }
    out
}

/// Non-empty segments of `path`, still escaped.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Canonical form: leading `/`, no empty segments, no trailing `/` (except the root).
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments(path) {
        out.push(SEPARATOR);
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push_str(ROOT);
    }
    out
}

/// Join an already-escaped relative path onto `parent`.
pub fn join_raw(parent: &str, relative: &str) -> String {
    let mut out = normalize(parent);
    for segment in segments(relative) {
        if out == ROOT {
            out.clear();
        }
        out.push(SEPARATOR);
        out.push_str(segment);
    }
    out
}

/// Join a single unescaped `name` onto `parent`.
pub fn join(parent: &str, name: &str) -> String {
    join_raw(parent, &escape_name(name))
}

/// Split `path` into its parent path and (escaped) final segment. The root has no parent.
pub fn split_last(path: &str) -> Option<(String, &str)> {
    let trimmed = path.trim_end_matches(SEPARATOR);
    let idx = trimmed.rfind(SEPARATOR)?;
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return None;
    }
    Some((normalize(&trimmed[..idx]), name))
}

/// Every prefix of `path` from the first segment down to `path` itself, excluding the root.
pub fn prefixes(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in segments(path) {
        current.push(SEPARATOR);
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// Return the part of `path` below `prefix`, or `None` when `prefix` is not an ancestor.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == ROOT {
        return Some(path.trim_start_matches(SEPARATOR));
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(SEPARATOR)
    }
}

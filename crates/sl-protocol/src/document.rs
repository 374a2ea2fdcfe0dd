//! Zero-copy key lookup over JSON shadow documents.
//!
//! [`find`] scans one object level of a document and returns the byte span of
//! the requested key's value, borrowed from the input. Nothing is allocated and
//! no parse tree is built. The whole document is still checked for structural
//! validity, so a truncated or malformed document is reported as not-found even
//! when the key appears before the damage. All reads are bounds-checked against
//! the slice; the scanner never looks past `document.len()`.

use std::str;

/// Nesting limit for objects and arrays inside a scanned document.
pub const MAX_DEPTH: usize = 64;

/// JSON type of a located value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Object,
    Array,
    Bool,
    Null,
}

/// A value located inside a document, borrowed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpan<'a> {
    raw: &'a [u8],
    kind: ValueKind,
}

impl<'a> ValueSpan<'a> {
    /// The value exactly as it appears in the document (strings keep their quotes).
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// The value's content: strings without their surrounding quotes (escapes
    /// are left as written), everything else as-is.
    pub fn contents(&self) -> &'a [u8] {
        match self.kind {
            ValueKind::String => &self.raw[1..self.raw.len() - 1],
            _ => self.raw,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn raw_str(&self) -> Option<&'a str> {
        str::from_utf8(self.raw).ok()
    }

    pub fn as_str(&self) -> Option<&'a str> {
        str::from_utf8(self.contents()).ok()
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.kind {
            ValueKind::Number => self.as_str()?.parse().ok(),
            _ => None,
        }
    }

    /// Look up `key` inside this value; `None` unless it is an object.
    pub fn find(&self, key: &str) -> Option<ValueSpan<'a>> {
        match self.kind {
            ValueKind::Object => find(self.raw, key),
            _ => None,
        }
    }
}

/// Find `key` among the direct members of the top-level object in `document`.
///
/// Nested objects are skipped over, never searched. Returns `None` when the key
/// is absent or the document is not a well-formed JSON object.
pub fn find<'a>(document: &'a [u8], key: &str) -> Option<ValueSpan<'a>> {
    let mut found = None;
    let end = scan_object(document, skip_ws(document, 0), 0, |k, span| {
        if found.is_none() && k == key.as_bytes() {
            found = Some(span);
        }
    })?;

    if skip_ws(document, end) != document.len() {
        return None;
    }
    found
}

/// Follow a chain of keys through nested objects, e.g. `["state", "desired"]`.
pub fn find_path<'a>(document: &'a [u8], path: &[&str]) -> Option<ValueSpan<'a>> {
    let (first, rest) = path.split_first()?;
    let mut span = find(document, first)?;
    for key in rest {
        span = span.find(key)?;
    }
    Some(span)
}

/// Content of `key`'s value (strings unquoted), borrowed from `document`.
pub fn parse_value<'a>(document: &'a [u8], key: &str) -> Option<&'a [u8]> {
    find(document, key).map(|span| span.contents())
}

/// Iterate over the direct members of the top-level object, in document order.
/// Returns `None` if the document is malformed.
pub fn members(document: &[u8]) -> Option<Vec<(&[u8], ValueSpan<'_>)>> {
    let mut out = Vec::new();
    let end = scan_object(document, skip_ws(document, 0), 0, |k, span| out.push((k, span)))?;
    if skip_ws(document, end) != document.len() {
        return None;
    }
    Some(out)
}

// ── Scanner ───────────────────────────────────────────────────

fn skip_ws(buf: &[u8], mut pos: usize) -> usize {
    while let Some(b' ' | b'\t' | b'\n' | b'\r') = buf.get(pos) {
        pos += 1;
    }
    pos
}

/// Scan an object starting at `pos` (which must hold `{`), reporting each
/// member's key (without quotes) and value span. Returns the position just
/// past the closing brace.
fn scan_object<'a, F>(buf: &'a [u8], pos: usize, depth: usize, mut on_member: F) -> Option<usize>
where
    F: FnMut(&'a [u8], ValueSpan<'a>),
{
    if depth >= MAX_DEPTH || buf.get(pos) != Some(&b'{') {
        return None;
    }
    let mut pos = skip_ws(buf, pos + 1);
    if buf.get(pos) == Some(&b'}') {
        return Some(pos + 1);
    }

    loop {
        let key_start = pos;
        let key_end = scan_string(buf, pos)?;
        let key = &buf[key_start + 1..key_end - 1];

        pos = skip_ws(buf, key_end);
        if buf.get(pos) != Some(&b':') {
            return None;
        }
        pos = skip_ws(buf, pos + 1);

        let value_start = pos;
        let (value_end, kind) = scan_value(buf, pos, depth + 1)?;
        on_member(
            key,
            ValueSpan {
                raw: &buf[value_start..value_end],
                kind,
            },
        );

        pos = skip_ws(buf, value_end);
        match buf.get(pos)? {
            b',' => pos = skip_ws(buf, pos + 1),
            b'}' => return Some(pos + 1),
            _ => return None,
        }
    }
}

fn scan_array(buf: &[u8], pos: usize, depth: usize) -> Option<usize> {
    if depth >= MAX_DEPTH || buf.get(pos) != Some(&b'[') {
        return None;
    }
    let mut pos = skip_ws(buf, pos + 1);
    if buf.get(pos) == Some(&b']') {
        return Some(pos + 1);
    }

    loop {
        let (end, _) = scan_value(buf, pos, depth + 1)?;
        pos = skip_ws(buf, end);
        match buf.get(pos)? {
            b',' => pos = skip_ws(buf, pos + 1),
            b']' => return Some(pos + 1),
            _ => return None,
        }
    }
}

fn scan_value(buf: &[u8], pos: usize, depth: usize) -> Option<(usize, ValueKind)> {
    match buf.get(pos)? {
        b'"' => Some((scan_string(buf, pos)?, ValueKind::String)),
        b'{' => Some((scan_object(buf, pos, depth, |_, _| {})?, ValueKind::Object)),
        b'[' => Some((scan_array(buf, pos, depth)?, ValueKind::Array)),
        b't' => Some((scan_literal(buf, pos, b"true")?, ValueKind::Bool)),
        b'f' => Some((scan_literal(buf, pos, b"false")?, ValueKind::Bool)),
        b'n' => Some((scan_literal(buf, pos, b"null")?, ValueKind::Null)),
        b'-' | b'0'..=b'9' => Some((scan_number(buf, pos)?, ValueKind::Number)),
        _ => None,
    }
}

/// Returns the position just past the closing quote.
fn scan_string(buf: &[u8], pos: usize) -> Option<usize> {
    if buf.get(pos) != Some(&b'"') {
        return None;
    }
    let mut pos = pos + 1;
    loop {
        match buf.get(pos)? {
            b'"' => return Some(pos + 1),
            b'\\' => {
                // The escaped byte must exist; its meaning is not interpreted.
                buf.get(pos + 1)?;
                pos += 2;
            }
            0x00..=0x1f => return None,
            _ => pos += 1,
        }
    }
}

fn scan_literal(buf: &[u8], pos: usize, literal: &[u8]) -> Option<usize> {
    let end = pos.checked_add(literal.len())?;
    (buf.get(pos..end)? == literal).then_some(end)
}

fn scan_number(buf: &[u8], pos: usize) -> Option<usize> {
    let mut pos = pos;
    if buf.get(pos) == Some(&b'-') {
        pos += 1;
    }
    pos = scan_digits(buf, pos)?;
    if buf.get(pos) == Some(&b'.') {
        pos = scan_digits(buf, pos + 1)?;
    }
    if let Some(b'e' | b'E') = buf.get(pos) {
        pos += 1;
        if let Some(b'+' | b'-') = buf.get(pos) {
            pos += 1;
        }
        pos = scan_digits(buf, pos)?;
    }
    Some(pos)
}

/// At least one digit.
fn scan_digits(buf: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    while let Some(b'0'..=b'9') = buf.get(pos) {
        pos += 1;
    }
    (pos > start).then_some(pos)
}

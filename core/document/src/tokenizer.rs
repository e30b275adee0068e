//! Line scanner for env-style documents.
//!
//! Recognizes, per line: `#` comments, blank lines, and
//! `[export ]KEY=VALUE` / `KEY: VALUE` assignments. Values may be single,
//! double or backtick quoted (escaped delimiters and line breaks allowed),
//! or bare up to an unescaped `#` or the end of the line. An unterminated
//! quote is read as a bare value. Lines matching nothing are kept verbatim.

use tracing::warn;

use crate::document::{Block, Entry, Quote};

/// Split `text` into blocks whose raw text concatenates back to `text`.
pub fn tokenize(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let next = line_end(text, pos);
        let line = &text[pos..next];
        let content = line.trim_start();

        if content.is_empty() {
            blocks.push(Block::Blank(line.to_string()));
            pos = next;
        } else if content.starts_with('#') {
            blocks.push(Block::Comment(line.to_string()));
            pos = next;
        } else if let Some((entry, end)) = parse_entry(text, pos) {
            blocks.push(Block::Entry(entry));
            pos = end;
        } else {
            let line_number = text[..pos].matches('\n').count() + 1;
            warn!(line = line_number, "Keeping unrecognized line verbatim");
            blocks.push(Block::Unrecognized(line.to_string()));
            pos = next;
        }
    }

    blocks
}

/// Index just past the next `\n` at or after `from`, or the end of `text`.
fn line_end(text: &str, from: usize) -> usize {
    text[from..]
        .find('\n')
        .map(|offset| from + offset + 1)
        .unwrap_or(text.len())
}

/// Index of the line break (`\n` or `\r\n`) ending the line containing `from`.
fn content_end(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut end = text[from..]
        .find('\n')
        .map(|offset| from + offset)
        .unwrap_or(text.len());
    if end > from && bytes[end - 1] == b'\r' {
        end -= 1;
    }
    end
}

fn skip_blanks(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
        pos += 1;
    }
    pos
}

fn is_key_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-')
}

/// Parse an assignment starting at `start`; returns the entry and the
/// index just past its last line.
fn parse_entry(text: &str, start: usize) -> Option<(Entry, usize)> {
    let bytes = text.as_bytes();
    let mut pos = skip_blanks(bytes, start);

    let mut exported = false;
    if text[pos..].starts_with("export") {
        let after = pos + "export".len();
        let key_start = skip_blanks(bytes, after);
        if key_start > after && key_start < bytes.len() && is_key_byte(bytes[key_start]) {
            exported = true;
            pos = key_start;
        }
    }

    let key_start = pos;
    while pos < bytes.len() && is_key_byte(bytes[pos]) {
        pos += 1;
    }
    if pos == key_start {
        return None;
    }
    let key = &text[key_start..pos];

    let sep = skip_blanks(bytes, pos);
    let value_pos = match bytes.get(sep) {
        Some(b'=') => sep + 1,
        // The blank after `:` belongs to the separator.
        Some(b':') if matches!(bytes.get(sep + 1), Some(b' ' | b'\t')) => sep + 2,
        _ => return None,
    };
    let value_start = skip_blanks(bytes, value_pos);

    let (value, quote, literal_end) =
        scan_quoted(text, value_start).unwrap_or_else(|| scan_bare(text, value_start));

    let end = line_end(text, literal_end);
    let entry = Entry {
        key: key.to_string(),
        value,
        quote,
        exported,
        prefix: text[start..value_pos].to_string(),
        literal: text[value_pos..literal_end].to_string(),
        suffix: text[literal_end..end].to_string(),
    };
    Some((entry, end))
}

/// Scan a quoted value; `None` if there is no opening quote or it is never closed.
fn scan_quoted(text: &str, start: usize) -> Option<(String, Quote, usize)> {
    let bytes = text.as_bytes();
    let delimiter = *bytes.get(start)?;
    let quote = match delimiter {
        b'"' => Quote::Double,
        b'\'' => Quote::Single,
        b'`' => Quote::Backtick,
        _ => return None,
    };

    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            byte if byte == delimiter => {
                let inner = &text[start + 1..pos];
                let value = match quote {
                    Quote::Double => inner.replace("\\n", "\n").replace("\\r", "\r"),
                    _ => inner.to_string(),
                };
                return Some((value, quote, pos + 1));
            }
            _ => pos += 1,
        }
    }
    None
}

/// Scan a bare value up to an unescaped `#` or the end of the line,
/// dropping trailing blanks.
fn scan_bare(text: &str, start: usize) -> (String, Quote, usize) {
    let bytes = text.as_bytes();
    let stop = content_end(text, start);

    let mut end = stop;
    let mut pos = start;
    while pos < stop {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'#' => {
                end = pos;
                break;
            }
            _ => pos += 1,
        }
    }
    while end > start && matches!(bytes[end - 1], b' ' | b'\t') {
        end -= 1;
    }

    let value = text[start..end].replace("\\#", "#");
    (value, Quote::None, end)
}

//! Line-level lexical helpers shared by the preprocessor and the assembler.
//!
//! The source language is line oriented: a statement is an optional run of
//! `label:` prefixes followed by a directive or instruction, with `;`
//! starting a comment that runs to end-of-line.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Everything before the first `;`.
pub fn strip_comment(text: &str) -> &str {
    match text.find(';') {
        Some(pos) => &text[..pos],
        None => text,
    }
}

pub fn is_ident(s: &str) -> bool {
    IDENT.is_match(s)
}

/// Peel `label:` prefixes off a comment-stripped, trimmed statement.
///
/// Returns the labels in order and the remaining statement text. Stops as
/// soon as the text before the next `:` is not an identifier, so colons
/// inside string literals are left alone.
pub fn peel_labels(code: &str) -> (Vec<&str>, &str) {
    let mut labels = Vec::new();
    let mut rest = code;
    while let Some(pos) = rest.find(':') {
        let lab = rest[..pos].trim();
        if !is_ident(lab) {
            break;
        }
        labels.push(lab);
        rest = rest[pos + 1..].trim();
        if rest.is_empty() {
            break;
        }
    }
    (labels, rest)
}

/// Split a statement into its first word and the (trimmed) remainder.
pub fn split_word(code: &str) -> (&str, &str) {
    match code.find(char::is_whitespace) {
        Some(pos) => (&code[..pos], code[pos..].trim()),
        None => (code, ""),
    }
}

/// Comma-separated operands, trimmed, with empty entries dropped so a
/// trailing comma is accepted.
pub fn split_operands(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an unsigned integer literal: `0x..` hex, `0b..` binary, else
/// decimal. Strict — trailing garbage is an error.
pub fn parse_int(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        return u32::from_str_radix(bin, 2).ok();
    }
    s.parse::<u32>().ok()
}

/// Decode a double-quoted `.string` operand into its payload bytes (without
/// the implicit NUL terminator).
///
/// Permitted escapes: `\\ \" \n \r \t \0 \xHH`. Every decoded byte must be
/// 7-bit ASCII. Errors are returned as bare messages; the caller attaches
/// the source location.
pub fn decode_string(quoted: &str) -> Result<Vec<u8>, String> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| quoted.len() >= 2)
        .ok_or_else(|| r#"invalid .string syntax, expected: .string "text""#.to_string())?;

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' {
            let esc = *bytes
                .get(i + 1)
                .ok_or_else(|| "invalid escape at end of string".to_string())?;
            i += 2;
            match esc {
                b'\\' => out.push(b'\\'),
                b'"' => out.push(b'"'),
                b'n' => out.push(0x0A),
                b'r' => out.push(0x0D),
                b't' => out.push(0x09),
                b'0' => out.push(0x00),
                b'x' => {
                    let hi = bytes.get(i).copied().and_then(hex_val);
                    let lo = bytes.get(i + 1).copied().and_then(hex_val);
                    match (hi, lo) {
                        (Some(h), Some(l)) => {
                            out.push((h << 4) | l);
                            i += 2;
                        }
                        _ => return Err(r"invalid \xHH escape (needs two hex digits)".to_string()),
                    }
                }
                other => {
                    return Err(format!("unknown escape sequence: \\{}", other as char));
                }
            }
        } else {
            if c > 0x7F {
                return Err("non-ASCII character in .string (only 7-bit ASCII allowed)".to_string());
            }
            out.push(c);
            i += 1;
        }
    }
    Ok(out)
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(10 + c - b'a'),
        b'A'..=b'F' => Some(10 + c - b'A'),
        _ => None,
    }
}

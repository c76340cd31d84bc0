// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Source literals understood by the board's interpreter.
//!
//! Host values are spliced into generated scripts only through [`py_str`]
//! and [`py_bytes`], and whatever the board prints back (lists of names,
//! `os.stat` tuples, `os.uname` records) is read with the parsers below.

use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiteralError {
    #[error("expected {expected}, found {found:?}")]
    Unexpected { expected: &'static str, found: String },
    #[error("unterminated string literal")]
    Unterminated,
    #[error("invalid escape sequence: {0}")]
    BadEscape(String),
    #[error("invalid integer: {0:?}")]
    BadInteger(String),
}

fn unexpected(expected: &'static str, rest: &str) -> LiteralError {
    LiteralError::Unexpected {
        expected,
        found: rest.chars().take(24).collect(),
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Single-quoted string literal evaluating to `s`
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Bytes literal (`b'...'`) evaluating to `data`
pub fn py_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 3);
    out.push_str("b'");
    for &b in data {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out.push('\'');
    out
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses one quoted string at the start of `input`, returning the value
/// and whatever follows the closing quote.
pub fn parse_str(input: &str) -> Result<(String, &str), LiteralError> {
    let input = input.trim_start();
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, q @ ('\'' | '"'))) => q,
        _ => return Err(unexpected("a quoted string", input)),
    };

    let mut value = String::new();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((value, &input[i + c.len_utf8()..]));
        }
        if c != '\\' {
            value.push(c);
            continue;
        }

        let (_, esc) = chars.next().ok_or(LiteralError::Unterminated)?;
        match esc {
            '\\' | '\'' | '"' => value.push(esc),
            'n' => value.push('\n'),
            'r' => value.push('\r'),
            't' => value.push('\t'),
            '0' => value.push('\0'),
            'x' => value.push(hex_escape(&mut chars, 2)?),
            'u' => value.push(hex_escape(&mut chars, 4)?),
            'U' => value.push(hex_escape(&mut chars, 8)?),
            other => {
                // Unknown escapes are kept verbatim
                value.push('\\');
                value.push(other);
            }
        }
    }

    Err(LiteralError::Unterminated)
}

fn hex_escape(chars: &mut std::str::CharIndices<'_>, digits: usize) -> Result<char, LiteralError> {
    let mut code = 0u32;
    for _ in 0..digits {
        let (_, c) = chars.next().ok_or(LiteralError::Unterminated)?;
        let digit = c
            .to_digit(16)
            .ok_or_else(|| LiteralError::BadEscape(c.to_string()))?;
        code = code * 16 + digit;
    }
    char::from_u32(code).ok_or_else(|| LiteralError::BadEscape(format!("{:x}", code)))
}

/// Parses a printed list of strings such as `['boot.py', "it's.txt"]`
pub fn parse_str_list(input: &str) -> Result<Vec<String>, LiteralError> {
    let trimmed = input.trim();
    let mut rest = trimmed
        .strip_prefix('[')
        .ok_or_else(|| unexpected("'['", trimmed))?;

    let mut items = Vec::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(']') {
            return expect_end(after).map(|_| items);
        }

        let (item, after) = parse_str(rest)?;
        items.push(item);

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with(']') {
            return Err(unexpected("',' or ']'", rest));
        }
    }
}

/// Parses a printed tuple of integers such as the result of `os.stat`
pub fn parse_int_tuple(input: &str) -> Result<Vec<i64>, LiteralError> {
    let trimmed = input.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| unexpected("a tuple", trimmed))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| LiteralError::BadInteger(s.to_string())))
        .collect()
}

/// Parses a printed named tuple of strings, e.g. `(sysname='rp2', release='1.20.0')`
pub fn parse_named_tuple(input: &str) -> Result<Vec<(String, String)>, LiteralError> {
    let trimmed = input.trim();
    let mut rest = trimmed
        .strip_prefix('(')
        .ok_or_else(|| unexpected("'('", trimmed))?;

    let mut fields = Vec::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(')') {
            return expect_end(after).map(|_| fields);
        }

        let (name, after) = rest.split_once('=').ok_or_else(|| unexpected("'='", rest))?;
        let (value, after) = parse_str(after)?;
        fields.push((name.trim().to_string(), value));

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with(')') {
            return Err(unexpected("',' or ')'", rest));
        }
    }
}

fn expect_end(rest: &str) -> Result<(), LiteralError> {
    let rest = rest.trim();
    if rest.is_empty() {
        Ok(())
    } else {
        Err(unexpected("end of output", rest))
    }
}

#[cfg(test)]
pub fn parse_bytes(input: &str) -> Result<(Vec<u8>, &str), LiteralError> {
    let input = input.trim_start();
    let body = input
        .strip_prefix('b')
        .ok_or_else(|| unexpected("a bytes literal", input))?;
    let (text, rest) = parse_str(body)?;
    let bytes = text
        .chars()
        .map(|c| u8::try_from(c).map_err(|_| LiteralError::BadEscape(c.to_string())))
        .collect::<Result<Vec<u8>, _>>()?;
    Ok((bytes, rest))
}

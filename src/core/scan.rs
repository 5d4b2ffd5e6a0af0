//! Purpose: Parse exactly one JSON value out of a partially filled buffer.
//! Exports: `ScanResult`, `scan`, `skip_whitespace`.
//! Role: Decision point of the chunked decoder, kept free of I/O so it can be tested directly.
//! Invariants: `Incomplete` means more input could still complete the value.
//! Invariants: `Invalid` means no amount of further input can make the value parse.
//! Invariants: A value that ends exactly at the end of the buffer and is not
//! self-delimiting (number or literal) is `Incomplete` until end of stream.
use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum ScanResult<T> {
    /// A complete value ending at `end`; `next` also skips the trailing whitespace.
    Parsed { value: T, end: usize, next: usize },
    /// The buffer ends before the value does.
    Incomplete { at: usize },
    /// The bytes at `at` can never be part of a valid value.
    Invalid { at: usize, error: serde_json::Error },
}

/// Attempt to parse one value starting at `offset`.
///
/// `at_eof` tells the primitive that `buf` holds everything the source will
/// ever produce, which removes the ambiguity of a trailing number such as
/// `12` that might continue as `123` in the next chunk.
pub fn scan<T: DeserializeOwned>(buf: &[u8], offset: usize, at_eof: bool) -> ScanResult<T> {
    let start = skip_whitespace(buf, offset);
    if start >= buf.len() {
        return ScanResult::Incomplete { at: buf.len() };
    }

    let input = &buf[start..];
    let mut values = serde_json::Deserializer::from_slice(input).into_iter::<T>();
    match values.next() {
        None => ScanResult::Incomplete { at: buf.len() },
        Some(Ok(value)) => {
            let end = start + values.byte_offset();
            if !at_eof && end == buf.len() && !is_self_delimiting(buf[start]) {
                return ScanResult::Incomplete { at: start };
            }
            ScanResult::Parsed {
                value,
                end,
                next: skip_whitespace(buf, end),
            }
        }
        Some(Err(error)) => {
            let at = start + error_index(input, &error);
            if error.is_eof() || (!at_eof && at >= buf.len()) {
                ScanResult::Incomplete { at }
            } else {
                ScanResult::Invalid { at, error }
            }
        }
    }
}

/// Offset of the first byte at or after `from` that is not JSON whitespace.
pub fn skip_whitespace(buf: &[u8], from: usize) -> usize {
    buf.get(from..)
        .and_then(|rest| rest.iter().position(|byte| !is_json_whitespace(*byte)))
        .map_or(buf.len(), |skipped| from + skipped)
}

fn is_json_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_self_delimiting(first: u8) -> bool {
    matches!(first, b'{' | b'[' | b'"')
}

// serde_json reports positions as line/column within the slice it was given.
fn error_index(input: &[u8], error: &serde_json::Error) -> usize {
    let line = error.line();
    let start_of_line = if line <= 1 {
        0
    } else {
        match input
            .iter()
            .enumerate()
            .filter(|(_, byte)| **byte == b'\n')
            .nth(line - 2)
        {
            Some((index, _)) => index + 1,
            None => return input.len(),
        }
    };
    (start_of_line + error.column()).min(input.len())
}

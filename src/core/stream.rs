//! Purpose: Decode whitespace-concatenated JSON values from a pull-based byte source.
//! Exports: `ObjectStream`, `DecodeOptions`, `object_stream`, `DEFAULT_CHUNK_SIZE`.
//! Role: Core decoder; every object fetched from a store is drained through it.
//! Invariants: The buffer only holds bytes not yet returned as a value.
//! Invariants: Parsed bytes are dropped before the next read, so buffering stays
//! bounded by one chunk plus the pending partial value.
//! Invariants: End of stream with pending bytes is `Truncated`; bytes that can
//! never parse are `Malformed`; both end the sequence.
use std::io::{self, Read};
use std::marker::PhantomData;

use bstr::ByteSlice;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind, read_error};
use crate::core::scan::{ScanResult, scan, skip_whitespace};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const MAX_SNIPPET_BYTES: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DecodeOptions {
    pub chunk_size: usize,
    /// Largest encoded value accepted, whether complete or still pending.
    pub max_value_bytes: Option<usize>,
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_value_bytes: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_value_bytes(mut self, max_value_bytes: usize) -> Self {
        self.max_value_bytes = Some(max_value_bytes);
        self
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of values decoded from `source`.
///
/// Values may be adjacent (`{}{}`) or separated by any JSON whitespace.
/// Each call to `next` reads from the source only when the buffered bytes do
/// not already hold a complete value. The iterator is fused: after the end of
/// the stream or the first error it keeps returning `None`.
///
/// ```no_run
/// use firehose_sipper::api::object_stream;
///
/// let file = std::fs::File::open("events.json")?;
/// for value in object_stream(file) {
///     println!("{}", value?);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ObjectStream<R, T = Value> {
    source: R,
    buffer: Vec<u8>,
    cursor: usize,
    consumed: u64,
    options: DecodeOptions,
    eof: bool,
    done: bool,
    _value: PhantomData<fn() -> T>,
}

/// Decode `serde_json::Value`s from `source` with default options.
pub fn object_stream<R: Read>(source: R) -> ObjectStream<R, Value> {
    ObjectStream::new(source)
}

impl<R: Read, T: DeserializeOwned> ObjectStream<R, T> {
    pub fn new(source: R) -> Self {
        Self::with_options(source, DecodeOptions::new())
    }

    /// A `chunk_size` of zero is treated as one byte.
    pub fn with_options(source: R, options: DecodeOptions) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            cursor: 0,
            consumed: 0,
            options,
            eof: false,
            done: false,
            _value: PhantomData,
        }
    }

    /// Bytes read from the source but not yet returned as part of a value.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn next_value(&mut self) -> Result<Option<T>, Error> {
        loop {
            self.cursor = skip_whitespace(&self.buffer, self.cursor);
            if self.cursor < self.buffer.len() {
                match scan::<T>(&self.buffer, self.cursor, self.eof) {
                    ScanResult::Parsed { value, end, next } => {
                        self.check_value_size(end - self.cursor)?;
                        self.cursor = next;
                        return Ok(Some(value));
                    }
                    ScanResult::Invalid { at, error } => {
                        return Err(self
                            .decode_error(ErrorKind::Malformed, "malformed json value", at)
                            .with_source(error));
                    }
                    ScanResult::Incomplete { .. } if self.eof => {
                        return Err(self.decode_error(
                            ErrorKind::Truncated,
                            "incomplete json value at end of stream",
                            self.cursor,
                        ));
                    }
                    ScanResult::Incomplete { .. } => self.check_value_size(self.pending_bytes())?,
                }
            } else if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    // Drop the parsed prefix, then append one chunk (or note end of stream).
    fn fill(&mut self) -> Result<(), Error> {
        if self.cursor > 0 {
            self.consumed += self.cursor as u64;
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }

        let chunk_size = self.options.chunk_size.max(1);
        let start = self.buffer.len();
        self.buffer.resize(start + chunk_size, 0);
        let read = loop {
            match self.source.read(&mut self.buffer[start..]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buffer.truncate(start);
                    return Err(read_error(err).with_offset(self.consumed + start as u64));
                }
            }
        };
        self.buffer.truncate(start + read);
        tracing::trace!(read, pending = self.buffer.len(), "read chunk");
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }

    fn check_value_size(&self, size: usize) -> Result<(), Error> {
        match self.options.max_value_bytes {
            Some(limit) if size > limit => Err(self
                .decode_error(ErrorKind::Oversize, "json value exceeds size limit", self.cursor)
                .with_hint(format!("Values are limited to {limit} bytes."))),
            _ => Ok(()),
        }
    }

    fn decode_error(&self, kind: ErrorKind, message: &str, at: usize) -> Error {
        let snippet = truncate_snippet(&self.buffer[self.cursor..], MAX_SNIPPET_BYTES);
        Error::new(kind)
            .with_message(format!("{message} near {snippet:?}"))
            .with_offset(self.consumed + at as u64)
    }
}

impl<R: Read, T: DeserializeOwned> Iterator for ObjectStream<R, T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_value() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R: Read, T: DeserializeOwned> std::iter::FusedIterator for ObjectStream<R, T> {}

fn truncate_snippet(input: &[u8], max: usize) -> String {
    let suffix = "...";
    if input.len() <= max {
        return input.to_str_lossy().into_owned();
    }
    let mut snippet = input[..max].to_str_lossy().into_owned();
    snippet.push_str(suffix);
    snippet
}

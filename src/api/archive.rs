//! Purpose: Decode every file inside a zip-archived object as one value sequence.
//! Exports: `ArchiveValues`.
//! Role: Zip branch of the encoding selector.
//! Invariants: Entries are decoded one at a time, in archive order; directories are skipped.
//! Invariants: Archive and entries are spooled to anonymous temp files, never held in memory.
//! Invariants: An unreadable archive is `Malformed`.
use std::fs::File;
use std::io::{self, Read, Seek};

use serde::de::DeserializeOwned;
use serde_json::Value;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::core::error::{Error, ErrorKind, read_error};
use crate::core::stream::{DecodeOptions, ObjectStream};

pub struct ArchiveValues<T = Value> {
    archive: ZipArchive<File>,
    key: String,
    next_entry: usize,
    current: Option<(String, ObjectStream<File, T>)>,
    options: DecodeOptions,
    done: bool,
}

impl<T: DeserializeOwned> ArchiveValues<T> {
    /// Spool `body` to disk and read the archive's central directory.
    pub fn open(mut body: impl Read, key: &str, options: DecodeOptions) -> Result<Self, Error> {
        let mut spool = spool_file()?;
        io::copy(&mut body, &mut spool).map_err(read_error)?;
        spool.rewind().map_err(spool_error)?;
        let archive = ZipArchive::new(spool).map_err(archive_error)?;
        tracing::debug!(key, entries = archive.len(), "opened zip archive");
        Ok(Self {
            archive,
            key: key.to_string(),
            next_entry: 0,
            current: None,
            options,
            done: false,
        })
    }

    fn open_next_entry(&mut self) -> Result<Option<(String, ObjectStream<File, T>)>, Error> {
        while self.next_entry < self.archive.len() {
            let index = self.next_entry;
            self.next_entry += 1;
            let mut entry = self.archive.by_index(index).map_err(archive_error)?;
            if entry.is_dir() {
                continue;
            }
            let label = format!("{}!{}", self.key, entry.name());
            let mut spool = spool_file()?;
            io::copy(&mut entry, &mut spool)
                .map_err(|err| read_error(err).with_key(label.clone()))?;
            spool.rewind().map_err(spool_error)?;
            tracing::debug!(entry = %label, "decoding archive entry");
            return Ok(Some((label, ObjectStream::with_options(spool, self.options))));
        }
        Ok(None)
    }
}

impl<T: DeserializeOwned> Iterator for ArchiveValues<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((label, stream)) = self.current.as_mut() {
                match stream.next() {
                    Some(Ok(value)) => return Some(Ok(value)),
                    Some(Err(err)) => {
                        let err = err.with_key(label.clone());
                        self.current = None;
                        self.done = true;
                        return Some(Err(err));
                    }
                    None => self.current = None,
                }
            }
            match self.open_next_entry() {
                Ok(Some(current)) => self.current = Some(current),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.or_key(&self.key)));
                }
            }
        }
    }
}

fn spool_file() -> Result<File, Error> {
    tempfile::tempfile().map_err(spool_error)
}

fn spool_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to spool archive to a temp file")
        .with_source(err)
}

fn archive_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(err) => read_error(err),
        other => Error::new(ErrorKind::Malformed)
            .with_message("invalid zip archive")
            .with_source(other),
    }
}

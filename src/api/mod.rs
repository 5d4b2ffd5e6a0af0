//! Purpose: Define the public Rust API of firehose-sipper.
//! Exports: Decoder, encoding selector, listing, stores, and the `sip` orchestrator.
//! Role: Public, additive-only surface used by the CLI and library callers.
//! Invariants: This module is the only public path to stores and orchestration.
//! Invariants: Store backends plug in through `ObjectStore`; nothing here depends on one.

mod archive;
mod dir;
mod encoding;
mod http;
mod listing;
mod memory;
mod sip;
mod store;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::scan::{ScanResult, scan};
pub use crate::core::stream::{DEFAULT_CHUNK_SIZE, DecodeOptions, ObjectStream, object_stream};
pub use archive::ArchiveValues;
pub use dir::{DirStore, infer_meta};
pub use encoding::{Encoding, GzipMode, ObjectValues, open_object, select_encoding};
pub use http::{ENDPOINT_ENV, HttpStore, TOKEN_ENV};
pub use listing::{ListingCursor, ObjectKeys, list_keys};
pub use memory::MemoryStore;
pub use sip::{Sip, SipOptions, SipTarget, sip};
pub use store::{ListPage, ObjectBody, ObjectMeta, ObjectStore, StoredObject};

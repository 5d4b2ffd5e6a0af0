//! Purpose: Library crate behind the `firehose-sipper` CLI.
//! Exports: `api` (stores, encoding selection, `sip`), `core` (decoder, errors).
//! Role: Streams concatenated JSON values out of object-store objects lazily.
//! Invariants: Memory stays bounded by chunk size plus the largest single value.
//! Invariants: Everything is pull-driven; no I/O happens until a value is requested.
pub mod api;
pub mod core;

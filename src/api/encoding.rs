//! Purpose: Decide how an object body is unwrapped before decoding, then open it.
//! Exports: `GzipMode`, `Encoding`, `select_encoding`, `open_object`, `ObjectValues`.
//! Role: Encoding selector between a store fetch and the chunked decoder.
//! Invariants: `GzipMode::On`/`Off` always win over object metadata.
//! Invariants: `Auto` trusts object metadata only (content-encoding / content-type);
//! key suffixes are never consulted here.
//! Invariants: Corrupt compressed data surfaces as `Malformed` from the value sequence.
use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::archive::ArchiveValues;
use crate::api::store::{ObjectBody, ObjectMeta};
use crate::core::error::Error;
use crate::core::stream::{DecodeOptions, ObjectStream};

/// Caller override for gzip handling.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GzipMode {
    /// Follow the object's metadata.
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Encoding {
    Identity,
    Gzip,
    Zip,
}

pub fn select_encoding(meta: &ObjectMeta, mode: GzipMode) -> Encoding {
    match mode {
        GzipMode::On => Encoding::Gzip,
        GzipMode::Off => Encoding::Identity,
        GzipMode::Auto => detect_encoding(meta),
    }
}

fn detect_encoding(meta: &ObjectMeta) -> Encoding {
    let content_encoding = meta.content_encoding.as_deref().map(str::trim);
    if content_encoding.is_some_and(|value| {
        value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip")
    }) {
        return Encoding::Gzip;
    }
    if content_encoding.is_some_and(|value| value.eq_ignore_ascii_case("zip")) {
        return Encoding::Zip;
    }
    let essence = meta
        .content_type
        .as_deref()
        .and_then(|value| value.split(';').next())
        .map(str::trim);
    if essence.is_some_and(|value| value.eq_ignore_ascii_case("application/zip")) {
        return Encoding::Zip;
    }
    Encoding::Identity
}

/// Values decoded from one object, whatever its encoding.
pub enum ObjectValues<T = Value> {
    Stream(ObjectStream<ObjectBody, T>),
    Archive(ArchiveValues<T>),
}

/// Wrap `body` according to `encoding` and start decoding it.
///
/// `key` only labels errors coming out of archive entries.
pub fn open_object<T: DeserializeOwned>(
    body: ObjectBody,
    encoding: Encoding,
    key: &str,
    options: DecodeOptions,
) -> Result<ObjectValues<T>, Error> {
    match encoding {
        Encoding::Identity => Ok(ObjectValues::Stream(ObjectStream::with_options(
            body, options,
        ))),
        Encoding::Gzip => {
            let inflated: ObjectBody = Box::new(MultiGzDecoder::new(body));
            Ok(ObjectValues::Stream(ObjectStream::with_options(
                inflated, options,
            )))
        }
        Encoding::Zip => Ok(ObjectValues::Archive(ArchiveValues::open(
            body, key, options,
        )?)),
    }
}

impl<T: DeserializeOwned> Iterator for ObjectValues<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ObjectValues::Stream(stream) => stream.next(),
            ObjectValues::Archive(archive) => archive.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Encoding, GzipMode, ObjectValues, open_object, select_encoding};
    use crate::api::store::{ObjectBody, ObjectMeta};
    use crate::core::error::ErrorKind;
    use crate::core::stream::DecodeOptions;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::{Value, json};
    use std::io::{Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("write");
        encoder.finish().expect("finish")
    }

    fn body(data: Vec<u8>) -> ObjectBody {
        Box::new(Cursor::new(data))
    }

    fn collect(values: ObjectValues<Value>) -> Result<Vec<Value>, crate::core::error::Error> {
        values.collect()
    }

    #[test]
    fn overrides_beat_metadata() {
        let gz = ObjectMeta::default().with_content_encoding("gzip");
        let plain = ObjectMeta::default();
        assert_eq!(select_encoding(&gz, GzipMode::Off), Encoding::Identity);
        assert_eq!(select_encoding(&plain, GzipMode::On), Encoding::Gzip);
        assert_eq!(
            select_encoding(&ObjectMeta::default().with_content_type("application/zip"), GzipMode::On),
            Encoding::Gzip
        );
    }

    #[test]
    fn auto_follows_metadata() {
        let cases = [
            (ObjectMeta::default(), Encoding::Identity),
            (ObjectMeta::default().with_content_encoding("gzip"), Encoding::Gzip),
            (ObjectMeta::default().with_content_encoding(" GZIP "), Encoding::Gzip),
            (ObjectMeta::default().with_content_encoding("x-gzip"), Encoding::Gzip),
            (ObjectMeta::default().with_content_encoding("br"), Encoding::Identity),
            (ObjectMeta::default().with_content_encoding("zip"), Encoding::Zip),
            (
                ObjectMeta::default().with_content_type("application/zip; charset=binary"),
                Encoding::Zip,
            ),
            (
                ObjectMeta::default().with_content_type("application/json"),
                Encoding::Identity,
            ),
        ];
        for (meta, expected) in cases {
            assert_eq!(select_encoding(&meta, GzipMode::Auto), expected, "{meta:?}");
        }
    }

    #[test]
    fn gzip_body_decodes_like_plain_body() {
        let payload = br#"{"a":1}{"a":2} {"a":3}"#;
        let plain = collect(
            open_object(body(payload.to_vec()), Encoding::Identity, "plain", DecodeOptions::new())
                .expect("open"),
        )
        .expect("plain");
        let inflated = collect(
            open_object(body(gzip(payload)), Encoding::Gzip, "packed", DecodeOptions::new())
                .expect("open"),
        )
        .expect("gzip");
        assert_eq!(plain, inflated);
        assert_eq!(inflated.len(), 3);
        assert_eq!(inflated[2], json!({"a": 3}));
    }

    #[test]
    fn concatenated_gzip_members_are_read_through() {
        let mut data = gzip(br#"{"part":1}"#);
        data.extend(gzip(br#" {"part":2}"#));
        let values = collect(
            open_object(body(data), Encoding::Gzip, "members", DecodeOptions::new())
                .expect("open"),
        )
        .expect("decode");
        assert_eq!(values, vec![json!({"part": 1}), json!({"part": 2})]);
    }

    #[test]
    fn corrupt_gzip_is_malformed() {
        let mut values = open_object::<Value>(
            body(b"definitely not gzip".to_vec()),
            Encoding::Gzip,
            "broken",
            DecodeOptions::new(),
        )
        .expect("open");
        let err = values.next().unwrap().expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(values.next().is_none());
    }
}

//! Purpose: End-to-end tests for `sip` over scripted stores.
//! Exports: None (integration test module).
//! Role: Validate paging order, encoding selection, laziness, and body release.
//! Invariants: Stores are in-process; no network or filesystem access.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use firehose_sipper::api::{
    DecodeOptions, Error, ErrorKind, GzipMode, ListPage, MemoryStore, ObjectMeta, ObjectStore,
    Sip, SipOptions, SipTarget, StoredObject, sip,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde_json::{Value, json};

/// Body that counts how many times it was dropped.
struct TrackedBody {
    inner: Cursor<Vec<u8>>,
    drops: Arc<AtomicUsize>,
}

impl Read for TrackedBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves fixed listing pages keyed by continuation token.
struct ScriptedStore {
    pages: HashMap<Option<String>, ListPage>,
    objects: HashMap<String, (Vec<u8>, ObjectMeta)>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    drops: Arc<AtomicUsize>,
}

impl ScriptedStore {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            objects: HashMap::new(),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn page(mut self, token: Option<&str>, keys: &[&str], next: Option<&str>) -> Self {
        self.pages.insert(
            token.map(str::to_string),
            ListPage {
                truncated: next.is_some(),
                continuation_token: next.map(str::to_string),
                entries: Some(keys.iter().map(|key| key.to_string()).collect()),
            },
        );
        self
    }

    fn object(mut self, key: &str, data: impl Into<Vec<u8>>, meta: ObjectMeta) -> Self {
        self.objects.insert(key.to_string(), (data.into(), meta));
        self
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

impl ObjectStore for ScriptedStore {
    fn list_page(
        &self,
        _bucket: &str,
        _prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(&continuation_token.map(str::to_string))
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::Transport).with_message("unexpected token"))
    }

    fn get_object(&self, _bucket: &str, key: &str) -> Result<StoredObject, Error> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let (data, meta) = self
            .objects
            .get(key)
            .ok_or_else(|| Error::new(ErrorKind::Transport).with_message("no such key"))?;
        Ok(StoredObject {
            meta: meta.clone(),
            body: Box::new(TrackedBody {
                inner: Cursor::new(data.clone()),
                drops: Arc::clone(&self.drops),
            }),
        })
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("finish")
}

fn three_page_store() -> ScriptedStore {
    ScriptedStore::new()
        .page(None, &["logs/a", "logs/b"], Some("t1"))
        .page(Some("t1"), &["logs/c"], Some("t2"))
        .page(Some("t2"), &["logs/d"], None)
        .object("logs/a", r#"{"n":1}{"n":2}"#, ObjectMeta::default())
        .object("logs/b", "{\"n\":3}\n", ObjectMeta::default())
        .object(
            "logs/c",
            gzip(br#"{"n":4} {"n":5}"#),
            ObjectMeta::default().with_content_encoding("gzip"),
        )
        .object("logs/d", "", ObjectMeta::default())
}

fn collect<S: ObjectStore>(values: Sip<S>) -> Vec<Value> {
    values.collect::<Result<_, _>>().expect("values")
}

#[test]
fn prefix_sip_walks_every_page_in_order() {
    let store = three_page_store();
    let values = collect(sip(&store, "bucket", Some("logs/"), None, SipOptions::new()).expect("sip"));
    assert_eq!(
        values,
        vec![
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"n": 3}),
            json!({"n": 4}),
            json!({"n": 5}),
        ]
    );
    assert_eq!(store.list_calls(), 3);
    assert_eq!(store.get_calls(), 4);
    assert_eq!(store.drops(), 4);
}

#[test]
fn values_are_identical_for_every_chunk_size() {
    let store = three_page_store();
    let baseline =
        collect(sip(&store, "bucket", Some("logs/"), None, SipOptions::new()).expect("sip"));
    for chunk_size in [1, 2, 3, 5, 8, 1024] {
        let options =
            SipOptions::new().with_decode(DecodeOptions::new().with_chunk_size(chunk_size));
        let values = collect(sip(&store, "bucket", Some("logs/"), None, options).expect("sip"));
        assert_eq!(values, baseline, "chunk size {chunk_size}");
    }
}

#[test]
fn gzip_overrides_beat_metadata() {
    let payload = br#"{"event":"click"}{"event":"view"}"#;
    let store = ScriptedStore::new()
        .object("plain-flagged", &payload[..], ObjectMeta::default().with_content_encoding("gzip"))
        .object("gzip-unflagged", gzip(payload), ObjectMeta::default())
        .object("gzip-flagged", gzip(payload), ObjectMeta::default().with_content_encoding("GZIP"));
    let expected = vec![json!({"event": "click"}), json!({"event": "view"})];

    let off = SipOptions::new().with_gzip(GzipMode::Off);
    let on = SipOptions::new().with_gzip(GzipMode::On);
    assert_eq!(collect(sip(&store, "b", None, Some("plain-flagged"), off).expect("sip")), expected);
    assert_eq!(collect(sip(&store, "b", None, Some("gzip-unflagged"), on).expect("sip")), expected);
    assert_eq!(
        collect(sip(&store, "b", None, Some("gzip-flagged"), SipOptions::new()).expect("sip")),
        expected
    );

    let mut mismatched =
        sip(&store, "b", None, Some("gzip-unflagged"), SipOptions::new()).expect("sip");
    let err = mismatched.next().expect("item").expect_err("binary gzip is not json");
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert_eq!(err.key(), Some("gzip-unflagged"));
}

#[test]
fn objects_are_fetched_on_demand() {
    let store = three_page_store();
    let mut values = sip(&store, "bucket", Some("logs/"), None, SipOptions::new()).expect("sip");
    assert_eq!(store.list_calls(), 0);
    assert_eq!(store.get_calls(), 0);

    assert_eq!(values.next().unwrap().expect("first"), json!({"n": 1}));
    assert_eq!(store.list_calls(), 1);
    assert_eq!(store.get_calls(), 1);
    assert_eq!(values.current_key(), Some("logs/a"));

    assert_eq!(values.next().unwrap().expect("second"), json!({"n": 2}));
    assert_eq!(values.next().unwrap().expect("third"), json!({"n": 3}));
    assert_eq!(store.get_calls(), 2);
    assert_eq!(store.drops(), 1);
    assert_eq!(values.objects_opened(), 2);
}

#[test]
fn abandoning_the_sequence_releases_the_open_body() {
    let store = three_page_store();
    let mut values = sip(&store, "bucket", Some("logs/"), None, SipOptions::new()).expect("sip");
    values.next().expect("first").expect("value");
    assert_eq!(store.drops(), 0);
    drop(values);
    assert_eq!(store.drops(), 1);
    assert_eq!(store.get_calls(), 1);
}

#[test]
fn decode_errors_stop_the_sequence_and_release_the_body() {
    let store = ScriptedStore::new()
        .page(None, &["a", "b"], None)
        .object("a", "[1] [", ObjectMeta::default())
        .object("b", "[2]", ObjectMeta::default());
    let mut values = sip(&store, "bucket", Some("x"), None, SipOptions::new()).expect("sip");
    assert_eq!(values.next().unwrap().expect("first"), json!([1]));
    let err = values.next().unwrap().expect_err("truncated");
    assert_eq!(err.kind(), ErrorKind::Truncated);
    assert_eq!(err.key(), Some("a"));
    assert_eq!(store.drops(), 1);
    assert!(values.next().is_none());
    assert_eq!(store.get_calls(), 1);
}

#[test]
fn zip_objects_are_read_entry_by_entry() {
    use zip::write::{FileOptions, ZipWriter};

    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
        zip.start_file("part-1.json", options).expect("start");
        zip.write_all(br#"{"n":1}{"n":2}"#).expect("write");
        zip.start_file("part-2.json", options).expect("start");
        zip.write_all(br#"{"n":3}"#).expect("write");
        zip.finish().expect("finish");
    }
    let store = ScriptedStore::new().object(
        "bundle",
        buffer,
        ObjectMeta::default().with_content_type("application/zip"),
    );
    let values = collect(sip(&store, "b", None, Some("bundle"), SipOptions::new()).expect("sip"));
    assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Delivery {
    id: u64,
    status: String,
}

#[test]
fn typed_values_deserialize_per_record() {
    let mut store = MemoryStore::new().with_page_size(1);
    store.insert("b", "d/1", r#"{"id":1,"status":"ok"}{"id":2,"status":"late"}"#);
    store.insert("b", "d/2", r#"{"id":3,"status":"ok"}"#);
    let target = SipTarget::from_parts(Some("d/"), None).expect("target");
    let deliveries: Vec<Delivery> = Sip::new(&store, "b", target, SipOptions::new())
        .collect::<Result<_, _>>()
        .expect("typed");
    assert_eq!(deliveries.len(), 3);
    assert_eq!(
        deliveries[1],
        Delivery {
            id: 2,
            status: "late".to_string()
        }
    );
    assert_eq!(store.list_calls(), 2);

    let target = SipTarget::from_parts(None, Some("d/2")).expect("target");
    let mut wrong = Sip::<_, Vec<u8>>::new(&store, "b", target, SipOptions::new());
    assert_eq!(wrong.next().unwrap().expect_err("shape").kind(), ErrorKind::Malformed);
}

//! Purpose: In-process `ObjectStore` with S3-like paging semantics.
//! Exports: `MemoryStore`.
//! Role: Test double and embedding helper; no I/O.
//! Invariants: Keys list in lexical order; the continuation token is the next key.
//! Invariants: Empty pages omit their entry list, as S3 omits `Contents`.
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::store::{ListPage, ObjectMeta, ObjectStore, StoredObject};
use crate::core::error::{Error, ErrorKind};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Vec<u8>,
    meta: ObjectMeta,
}

#[derive(Debug)]
pub struct MemoryStore {
    buckets: BTreeMap<String, BTreeMap<String, MemoryObject>>,
    page_size: usize,
    list_calls: AtomicU64,
    get_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            list_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
        }
    }

    /// Entries per listing page; zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&mut self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.insert_with_meta(bucket, key, data, ObjectMeta::default());
    }

    pub fn insert_with_meta(
        &mut self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        mut meta: ObjectMeta,
    ) {
        let data = data.into();
        meta.content_length = Some(data.len() as u64);
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), MemoryObject { data, meta });
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }

    fn bucket(&self, bucket: &str) -> Result<&BTreeMap<String, MemoryObject>, Error> {
        self.buckets.get(bucket).ok_or_else(|| {
            Error::new(ErrorKind::Transport).with_message(format!("no such bucket: {bucket}"))
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let objects = self.bucket(bucket)?;
        let start = continuation_token.unwrap_or(prefix);
        let mut matching = objects
            .range::<str, _>((std::ops::Bound::Included(start), std::ops::Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));

        let entries: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let continuation_token = matching.next().cloned();
        Ok(ListPage {
            truncated: continuation_token.is_some(),
            continuation_token,
            entries: if entries.is_empty() {
                None
            } else {
                Some(entries)
            },
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        let object = self.bucket(bucket)?.get(key).ok_or_else(|| {
            Error::new(ErrorKind::Transport)
                .with_message("no such key")
                .with_key(key)
        })?;
        Ok(StoredObject {
            meta: object.meta.clone(),
            body: Box::new(Cursor::new(object.data.clone())),
        })
    }
}

//! Purpose: Flatten paginated prefix listings into one lazy sequence of keys.
//! Exports: `ObjectKeys`, `ListingCursor`, `list_keys`.
//! Role: Object enumerator feeding the sip orchestrator.
//! Invariants: Keys are yielded in store order, page after page.
//! Invariants: A page is requested only once the previous page's keys are consumed.
//! Invariants: Listing stops on `truncated == false`, an omitted entry list, or a
//! truncated page with no continuation token. Errors end the sequence.
use std::collections::VecDeque;

use crate::api::store::ObjectStore;
use crate::core::error::Error;

/// Paging state, separate from the store so callers can own the store elsewhere.
#[derive(Debug)]
pub struct ListingCursor {
    bucket: String,
    prefix: String,
    continuation_token: Option<String>,
    pending: VecDeque<String>,
    pages: u64,
    finished: bool,
}

impl ListingCursor {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            continuation_token: None,
            pending: VecDeque::new(),
            pages: 0,
            finished: false,
        }
    }

    /// Listing pages requested so far.
    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn next_key<S: ObjectStore + ?Sized>(&mut self, store: &S) -> Option<Result<String, Error>> {
        loop {
            if let Some(key) = self.pending.pop_front() {
                return Some(Ok(key));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.fetch_page(store) {
                self.finished = true;
                return Some(Err(err));
            }
        }
    }

    fn fetch_page<S: ObjectStore + ?Sized>(&mut self, store: &S) -> Result<(), Error> {
        let page = store.list_page(
            &self.bucket,
            &self.prefix,
            self.continuation_token.as_deref(),
        )?;
        self.pages += 1;
        tracing::debug!(
            bucket = %self.bucket,
            prefix = %self.prefix,
            page = self.pages,
            truncated = page.truncated,
            entries = page.entries.as_ref().map_or(0, Vec::len),
            "fetched listing page"
        );

        let Some(entries) = page.entries else {
            self.finished = true;
            return Ok(());
        };
        self.pending.extend(entries);
        match page.continuation_token {
            Some(token) if page.truncated => self.continuation_token = Some(token),
            _ => self.finished = true,
        }
        Ok(())
    }
}

/// Keys under `prefix`, owning the store they are listed from.
pub struct ObjectKeys<S> {
    store: S,
    cursor: ListingCursor,
}

pub fn list_keys<S: ObjectStore>(store: S, bucket: &str, prefix: &str) -> ObjectKeys<S> {
    ObjectKeys {
        store,
        cursor: ListingCursor::new(bucket, prefix),
    }
}

impl<S: ObjectStore> ObjectKeys<S> {
    pub fn pages(&self) -> u64 {
        self.cursor.pages()
    }
}

impl<S: ObjectStore> Iterator for ObjectKeys<S> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_key(&self.store)
    }
}

//! Purpose: Define the object-store seam consumed by listing and fetching.
//! Exports: `ObjectStore`, `ListPage`, `ObjectMeta`, `StoredObject`, `ObjectBody`.
//! Role: Boundary between the decoder pipeline and concrete stores (memory, dir, http).
//! Invariants: Stores perform no retries; failures surface as `Transport` errors.
//! Invariants: A `StoredObject` owns its body; dropping it releases the remote resource.
use std::fmt;
use std::io::Read;

use crate::core::error::Error;

pub type ObjectBody = Box<dyn Read + Send>;

/// One page of a prefix listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListPage {
    pub truncated: bool,
    pub continuation_token: Option<String>,
    /// `None` when the store omitted the entry list entirely.
    pub entries: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectMeta {
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl ObjectMeta {
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

pub struct StoredObject {
    pub meta: ObjectMeta,
    pub body: ObjectBody,
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Listing and fetching for a bucket-style store.
pub trait ObjectStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error>;

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        (**self).list_page(bucket, prefix, continuation_token)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error> {
        (**self).get_object(bucket, key)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        (**self).list_page(bucket, prefix, continuation_token)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error> {
        (**self).get_object(bucket, key)
    }
}

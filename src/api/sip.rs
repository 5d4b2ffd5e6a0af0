//! Purpose: Stream decoded values out of one object or every object under a prefix.
//! Exports: `sip`, `Sip`, `SipOptions`, `SipTarget`.
//! Role: Top-level orchestrator tying listing, fetching, encoding selection and decoding.
//! Invariants: Exactly one of key/prefix is accepted; the check runs before any store call.
//! Invariants: Objects are fetched one at a time, only after the previous one is drained.
//! Invariants: The open object body is dropped as soon as its values are exhausted,
//! on error, or when the `Sip` itself is dropped.
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::encoding::{GzipMode, ObjectValues, open_object, select_encoding};
use crate::api::listing::ListingCursor;
use crate::api::store::ObjectStore;
use crate::core::error::{Error, ErrorKind};
use crate::core::stream::DecodeOptions;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SipOptions {
    pub gzip: GzipMode,
    pub decode: DecodeOptions,
}

impl SipOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gzip(mut self, gzip: GzipMode) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SipTarget {
    Key(String),
    Prefix(String),
}

impl SipTarget {
    /// Empty strings count as absent.
    pub fn from_parts(prefix: Option<&str>, key: Option<&str>) -> Result<Self, Error> {
        let prefix = prefix.filter(|value| !value.is_empty());
        let key = key.filter(|value| !value.is_empty());
        match (prefix, key) {
            (None, Some(key)) => Ok(SipTarget::Key(key.to_string())),
            (Some(prefix), None) => Ok(SipTarget::Prefix(prefix.to_string())),
            _ => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("you must provide either a key or a prefix")
                .with_hint("Pass a key for one object or a prefix for every object under it.")),
        }
    }
}

enum KeyPlan {
    Single(Option<String>),
    Listing(ListingCursor),
}

/// Lazy, ordered concatenation of the value sequences of the resolved objects.
pub struct Sip<S, T = Value> {
    store: S,
    bucket: String,
    keys: KeyPlan,
    current: Option<(String, ObjectValues<T>)>,
    options: SipOptions,
    objects_opened: u64,
    done: bool,
}

/// Validate the request and return the value sequence; no I/O happens until
/// the first call to `next`.
///
/// ```no_run
/// use firehose_sipper::api::{HttpStore, SipOptions, sip};
///
/// let store = HttpStore::new("http://localhost:9000")?;
/// for value in sip(store, "exports", Some("2024/01/"), None, SipOptions::new())? {
///     println!("{}", value?);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn sip<S: ObjectStore>(
    store: S,
    bucket: &str,
    prefix: Option<&str>,
    key: Option<&str>,
    options: SipOptions,
) -> Result<Sip<S, Value>, Error> {
    let target = SipTarget::from_parts(prefix, key)?;
    Ok(Sip::new(store, bucket, target, options))
}

impl<S: ObjectStore, T: DeserializeOwned> Sip<S, T> {
    pub fn new(store: S, bucket: &str, target: SipTarget, options: SipOptions) -> Self {
        let keys = match target {
            SipTarget::Key(key) => KeyPlan::Single(Some(key)),
            SipTarget::Prefix(prefix) => KeyPlan::Listing(ListingCursor::new(bucket, prefix)),
        };
        Self {
            store,
            bucket: bucket.to_string(),
            keys,
            current: None,
            options,
            objects_opened: 0,
            done: false,
        }
    }

    /// Key of the object whose values are currently being yielded.
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|(key, _)| key.as_str())
    }

    pub fn objects_opened(&self) -> u64 {
        self.objects_opened
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn next_key(&mut self) -> Option<Result<String, Error>> {
        match &mut self.keys {
            KeyPlan::Single(key) => key.take().map(Ok),
            KeyPlan::Listing(cursor) => cursor.next_key(&self.store),
        }
    }

    fn open(&mut self, key: &str) -> Result<ObjectValues<T>, Error> {
        let object = self.store.get_object(&self.bucket, key)?;
        let encoding = select_encoding(&object.meta, self.options.gzip);
        self.objects_opened += 1;
        tracing::debug!(
            bucket = %self.bucket,
            key,
            ?encoding,
            content_length = object.meta.content_length,
            "opening object"
        );
        open_object(object.body, encoding, key, self.options.decode)
    }

    fn fail(&mut self, err: Error) -> Option<Result<T, Error>> {
        self.current = None;
        self.done = true;
        Some(Err(err))
    }
}

impl<S: ObjectStore, T: DeserializeOwned> Iterator for Sip<S, T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((key, values)) = self.current.as_mut() {
                match values.next() {
                    Some(Ok(value)) => return Some(Ok(value)),
                    Some(Err(err)) => {
                        let err = err.or_key(key);
                        return self.fail(err);
                    }
                    None => {
                        tracing::trace!(key = %key, "object drained");
                        self.current = None;
                    }
                }
            }

            let key = match self.next_key() {
                Some(Ok(key)) => key,
                Some(Err(err)) => return self.fail(err),
                None => {
                    self.done = true;
                    return None;
                }
            };
            match self.open(&key) {
                Ok(values) => self.current = Some((key, values)),
                Err(err) => return self.fail(err.or_key(&key)),
            }
        }
    }
}

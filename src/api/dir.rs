//! Purpose: Serve a local directory tree through the `ObjectStore` seam.
//! Exports: `DirStore`, `infer_meta`.
//! Role: Local backend for the CLI and tests; a bucket is a sub-directory of the root.
//! Invariants: Keys are `/`-separated paths relative to the bucket directory.
//! Invariants: Keys and buckets never escape the root (`..`, absolute paths are rejected).
//! Invariants: Listings are sorted and always fit in a single page.
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::api::store::{ListPage, ObjectMeta, ObjectStore, StoredObject};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, Error> {
        ensure_relative(bucket)?;
        Ok(self.root.join(bucket))
    }
}

/// Metadata a local file would carry if it had been uploaded with the usual tools.
pub fn infer_meta(name: &str) -> ObjectMeta {
    let lower = name.to_ascii_lowercase();
    let meta = ObjectMeta::default();
    if lower.ends_with(".gz") {
        meta.with_content_encoding("gzip")
    } else if lower.ends_with(".zip") {
        meta.with_content_type("application/zip")
    } else {
        meta
    }
}

fn ensure_relative(path: &str) -> Result<(), Error> {
    let escapes = Path::new(path)
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("path must stay inside the store root")
            .with_key(path));
    }
    Ok(())
}

fn transport(err: io::Error, message: &str, path: &Path) -> Error {
    Error::new(ErrorKind::Transport)
        .with_message(format!("{message}: {}", path.display()))
        .with_source(err)
}

fn walk(dir: &Path, relative: &str, keys: &mut Vec<String>) -> Result<(), Error> {
    let entries = fs::read_dir(dir).map_err(|err| transport(err, "failed to list", dir))?;
    for entry in entries {
        let entry = entry.map_err(|err| transport(err, "failed to list", dir))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if relative.is_empty() {
            name
        } else {
            format!("{relative}/{name}")
        };
        let metadata = fs::metadata(&path).map_err(|err| transport(err, "failed to stat", &path))?;
        if metadata.is_dir() {
            walk(&path, &key, keys)?;
        } else if metadata.is_file() {
            keys.push(key);
        }
    }
    Ok(())
}

impl ObjectStore for DirStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        _continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        let dir = self.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        walk(&dir, "", &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(ListPage {
            truncated: false,
            continuation_token: None,
            entries: if keys.is_empty() { None } else { Some(keys) },
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error> {
        ensure_relative(key)?;
        let path = self.bucket_dir(bucket)?.join(key);
        let file = File::open(&path).map_err(|err| transport(err, "failed to open", &path))?;
        let mut meta = infer_meta(key);
        meta.content_length = file.metadata().ok().map(|metadata| metadata.len());
        Ok(StoredObject {
            meta,
            body: Box::new(file),
        })
    }
}

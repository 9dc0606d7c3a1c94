//! Shared test plumbing: a recording in-memory object store and archive
//! fixture builders.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

use meg::archive::ByteRange;
use meg::error::{MegError, Result};
use meg::store::{GetResult, HeadObject, ObjectStore, ObjectSummary};

/// One observed store call, for asserting request plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Head(String),
    List(String),
    Get {
        key: String,
        range: Option<(u64, u64)>,
        conditional: bool,
    },
}

#[derive(Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub etag: String,
    pub accept_ranges: bool,
}

/// In-memory store that records every call it serves.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, body: impl Into<Bytes>, content_type: Option<&str>) {
        let body = body.into();
        let etag = format!("\"etag-{}-{}\"", key, body.len());
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(String::from),
                etag,
                accept_ranges: true,
            },
        );
    }

    /// Overwrite an object, giving it a fresh ETag.
    pub fn replace(&self, key: &str, body: impl Into<Bytes>) {
        let mut objects = self.objects.lock().unwrap();
        let old = objects.get(key).cloned();
        let body = body.into();
        let etag = format!("\"etag-{}-{}-v2\"", key, body.len());
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: old.as_ref().and_then(|o| o.content_type.clone()),
                etag,
                accept_ranges: old.map(|o| o.accept_ranges).unwrap_or(true),
            },
        );
    }

    pub fn set_accept_ranges(&self, key: &str, accept: bool) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(key) {
            obj.accept_ranges = accept;
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Full, unranged GETs observed so far.
    pub fn full_get_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Get { range: None, .. }))
            .count()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<HeadObject> {
        self.record(StoreCall::Head(key.to_string()));
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(key)
            .ok_or_else(|| MegError::NotFoundArchive(key.to_string()))?;
        Ok(HeadObject {
            content_type: obj.content_type.clone(),
            content_length: obj.body.len() as u64,
            accept_ranges: obj.accept_ranges,
            etag: Some(obj.etag.clone()),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        self.record(StoreCall::List(prefix.to_string()));
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectSummary {
                key: k.clone(),
                size: o.body.len() as u64,
            })
            .collect())
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
        if_none_match: Option<&str>,
    ) -> Result<GetResult> {
        self.record(StoreCall::Get {
            key: key.to_string(),
            range: range.map(|r| (r.start, r.end)),
            conditional: if_none_match.is_some(),
        });
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(key)
            .ok_or_else(|| MegError::NotFoundArchive(key.to_string()))?;

        if if_none_match == Some(obj.etag.as_str()) {
            return Ok(GetResult {
                body: Bytes::new(),
                content_type: None,
                content_length: None,
                content_encoding: None,
                etag: Some(obj.etag.clone()),
                not_modified: true,
            });
        }

        let body = match range {
            Some(r) => {
                let start = r.start as usize;
                let end = ((r.end + 1) as usize).min(obj.body.len());
                if start >= obj.body.len() {
                    return Err(MegError::transport(format!(
                        "range {r} out of bounds for {key} ({} bytes)",
                        obj.body.len()
                    )));
                }
                obj.body.slice(start..end)
            }
            None => obj.body.clone(),
        };

        Ok(GetResult {
            content_type: obj.content_type.clone(),
            content_length: Some(body.len() as u64),
            content_encoding: None,
            etag: Some(obj.etag.clone()),
            not_modified: false,
            body,
        })
    }
}

/// A zip archive with the given (path, contents) members, deflate-packed.
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (path, contents) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A gzipped tarball with the given (path, contents) members.
pub fn build_targz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, *path, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

//! The request planner: decides, per request, which store calls to issue
//! given the cache state and the archive format's capabilities.
//!
//! Resolution walks a fixed ladder. A cached archive body short-circuits
//! everything. Otherwise the HEAD cache (single-flight) yields the stored
//! key and object metadata; the format comes from the HEAD content-type or
//! the stored key's extension. Seekable formats on range-capable objects
//! take the fast path — one ranged read for the central index (cached),
//! one ranged read for the entry — while everything else downloads the
//! object once, caches it, and reads through the FS view.

use crate::archive::ArchiveMetadata;
use crate::cache::{MegCaches, ARCHIVE_TTL_MAX};
use crate::error::{MegError, Result};
use crate::format::{ArchiveFormat, FormatRegistry};
use crate::store::{resolve_stored, HeadObject, ObjectStore};
use crate::vfs::ArchiveFs;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The resolved `(stored_key, head)` pair, cached as JSON bytes because
/// the cache backend is byte-oriented.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadEntry {
    stored_key: String,
    head: HeadObject,
}

/// A decoded inner file ready for response composition.
#[derive(Debug)]
pub struct PlannedEntry {
    pub body: Bytes,
    pub metadata: ArchiveMetadata,
}

/// A verbatim archive object.
#[derive(Debug)]
pub struct PlannedArchive {
    pub body: Bytes,
    pub content_type: Option<String>,
}

pub struct Planner {
    store: Arc<dyn ObjectStore>,
    caches: Arc<MegCaches>,
    registry: Arc<FormatRegistry>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        caches: Arc<MegCaches>,
        registry: Arc<FormatRegistry>,
    ) -> Self {
        Planner {
            store,
            caches,
            registry,
        }
    }

    pub fn caches(&self) -> &Arc<MegCaches> {
        &self.caches
    }

    /// Resolve `name` to its stored key and HEAD metadata through the HEAD
    /// cache. The fill also records the object's ETag.
    async fn resolve_head(&self, name: &str) -> Result<HeadEntry> {
        let store = self.store.as_ref();
        let etags = &self.caches.etags;
        let bytes = self
            .caches
            .heads
            .fetch(name, None, || async move {
                let (stored_key, head) = resolve_stored(store, name).await?;
                if let Some(etag) = &head.etag {
                    etags.set(name, etag.clone());
                }
                let entry = HeadEntry { stored_key, head };
                serde_json::to_vec(&entry)
                    .map(Bytes::from)
                    .map_err(MegError::decode)
            })
            .await?;
        serde_json::from_slice(&bytes).map_err(MegError::decode)
    }

    /// Pick a format from the HEAD content-type, falling back to the
    /// stored key's extension. With neither, the request cannot proceed.
    fn format_for(&self, head: &HeadObject, stored_key: &str) -> Result<Arc<dyn ArchiveFormat>> {
        if let Some(ct) = &head.content_type {
            if let Some(format) = self.registry.by_content_type(ct) {
                return Ok(Arc::clone(format));
            }
        }
        if let Some(format) = self.registry.by_filename(stored_key) {
            return Ok(Arc::clone(format));
        }
        Err(MegError::UnknownFormat(stored_key.to_string()))
    }

    /// Serve one entry out of `name`. `ttl_override` extends the archive
    /// body's cache lifetime for this request, capped at two days.
    pub async fn fetch_entry(
        &self,
        name: &str,
        inner_path: &str,
        ttl_override: Option<Duration>,
    ) -> Result<PlannedEntry> {
        // A cached body beats any amount of cleverness.
        if let Some(body) = self.caches.archives.get(name).await {
            debug!(archive = name, "serving from cached archive body");
            return self.read_from_body(name, &body, inner_path);
        }

        let HeadEntry { stored_key, head } = self.resolve_head(name).await?;
        let format = self.format_for(&head, &stored_key)?;

        if let Some(seekable) = format.seekable().filter(|_| head.accept_ranges) {
            debug!(archive = name, key = %stored_key, "seekable fast path");
            let total_len = head.content_length;
            let store = self.store.as_ref();
            let key = stored_key.as_str();
            let index_bytes = self
                .caches
                .indexes
                .fetch(name, None, || async move {
                    let hint = seekable
                        .index_hint_ranges(total_len)
                        .into_iter()
                        .next()
                        .ok_or_else(|| MegError::decode("format offered no index ranges"))?;
                    let got = store.get(key, Some(hint), None).await?;
                    Ok(got.body)
                })
                .await?;

            let index = seekable.decode_index(&index_bytes, total_len)?;
            let Some(meta) = index.get(inner_path) else {
                return Err(MegError::NotFoundEntry(inner_path.to_string()));
            };

            let got = self.store.get(&stored_key, Some(meta.range()), None).await?;
            let entry = seekable.decode_entry(&got.body, meta)?;
            if entry.data.is_empty() && meta.uncompressed_size.unwrap_or(0) > 0 {
                warn!(
                    archive = name,
                    entry = inner_path,
                    declared = meta.uncompressed_size.unwrap_or(0),
                    "entry decoded empty despite non-zero declared size; returning it anyway"
                );
            }
            return Ok(PlannedEntry {
                body: entry.data.clone(),
                metadata: entry.metadata.clone(),
            });
        }

        // Whole-archive path: one full download, cached for everyone.
        debug!(archive = name, key = %stored_key, "whole-archive path");
        let ttl = ttl_override.map(|d| d.min(ARCHIVE_TTL_MAX));
        let store = self.store.as_ref();
        let etags = &self.caches.etags;
        let key = stored_key.as_str();
        let body = self
            .caches
            .archives
            .fetch(name, ttl, || async move {
                let got = store.get(key, None, None).await?;
                if let Some(etag) = &got.etag {
                    etags.set(name, etag.clone());
                }
                Ok(got.body)
            })
            .await?;

        self.read_from_body(name, &body, inner_path)
    }

    /// Decode a complete archive body and read one entry through the FS
    /// view. Format resolution runs the full ladder (magic, extension,
    /// trial decode) since cached bodies arrive without HEAD context.
    fn read_from_body(&self, name: &str, body: &Bytes, inner_path: &str) -> Result<PlannedEntry> {
        let (_, archive) = self.registry.resolve(name, body)?;
        if archive.is_empty() {
            warn!(archive = name, "archive decoded with no entries");
        }

        let fs = ArchiveFs::new(&archive);
        let entry = fs.entry(inner_path)?;
        if entry.data.is_empty() && entry.metadata.uncompressed_size.unwrap_or(0) > 0 {
            warn!(
                archive = name,
                entry = inner_path,
                declared = entry.metadata.uncompressed_size.unwrap_or(0),
                "entry decoded empty despite non-zero declared size; returning it anyway"
            );
        }
        Ok(PlannedEntry {
            body: entry.data.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    /// Serve the archive object itself, verbatim.
    pub async fn fetch_archive(&self, name: &str) -> Result<PlannedArchive> {
        let HeadEntry { stored_key, head } = self.resolve_head(name).await?;

        if let Some(body) = self.caches.archives.get(name).await {
            return Ok(PlannedArchive {
                body,
                content_type: head.content_type,
            });
        }

        let store = self.store.as_ref();
        let etags = &self.caches.etags;
        let key = stored_key.as_str();
        let body = self
            .caches
            .archives
            .fetch(name, None, || async move {
                let got = store.get(key, None, None).await?;
                if let Some(etag) = &got.etag {
                    etags.set(name, etag.clone());
                }
                Ok(got.body)
            })
            .await?;

        Ok(PlannedArchive {
            body,
            content_type: head.content_type,
        })
    }
}

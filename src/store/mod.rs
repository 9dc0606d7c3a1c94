//! Abstract object-store access: HEAD, prefix LIST, plain and ranged GET
//! with conditional requests. Concrete transports (S3 here, anything
//! S3-shaped elsewhere) implement [`ObjectStore`]; credentials never leak
//! past the implementation.

pub mod s3;

use crate::archive::ByteRange;
use crate::error::{MegError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use s3::S3ObjectStore;

/// Metadata from a HEAD request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadObject {
    pub content_type: Option<String>,
    pub content_length: u64,
    /// Whether the store advertises byte-range support for this object.
    pub accept_ranges: bool,
    pub etag: Option<String>,
}

/// One row of a prefix listing.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Result of a GET, conditional or not.
#[derive(Debug, Clone)]
pub struct GetResult {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_encoding: Option<String>,
    pub etag: Option<String>,
    /// Set when an `if_none_match` condition held; the body is empty.
    pub not_modified: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Object metadata, or `NotFoundArchive` / `Transport`.
    async fn head(&self, key: &str) -> Result<HeadObject>;

    /// Keys under `prefix`, in the store's listing order. An empty result
    /// is returned as an empty vec; callers decide whether that is fatal.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;

    /// Fetch an object, optionally restricted to a closed byte range and
    /// optionally conditional on an ETag.
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
        if_none_match: Option<&str>,
    ) -> Result<GetResult>;
}

/// Resolve a user-facing archive name to its stored key: try the exact
/// key first, then fall back to a prefix listing and take the first key
/// with a non-empty name (`docs` → `docs.zip`).
pub async fn resolve_stored(store: &dyn ObjectStore, name: &str) -> Result<(String, HeadObject)> {
    match store.head(name).await {
        Ok(head) => Ok((name.to_string(), head)),
        Err(MegError::NotFoundArchive(_)) => {
            let listing = store.list(name).await?;
            let key = listing
                .into_iter()
                .map(|o| o.key)
                .find(|k| !k.trim_matches('/').is_empty())
                .ok_or_else(|| MegError::NotFoundArchive(name.to_string()))?;
            let head = store.head(&key).await?;
            Ok((key, head))
        }
        Err(other) => Err(other),
    }
}

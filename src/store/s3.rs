//! S3 implementation of the object-store contract.

use super::{GetResult, HeadObject, ObjectStore, ObjectSummary};
use crate::archive::ByteRange;
use crate::error::{MegError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Path-style addressing, required by most non-AWS implementations.
    pub force_path_style: bool,
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from ambient AWS configuration plus any explicit
    /// overrides.
    pub async fn connect(bucket: impl Into<String>, options: S3Options) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = options.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let (Some(access), Some(secret)) = (&options.access_key, &options.secret_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "meg-config",
            ));
        }
        let base = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base);
        if let Some(endpoint) = &options.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if options.force_path_style {
            builder = builder.force_path_style(true);
        }

        S3ObjectStore {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
        }
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        S3ObjectStore {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

fn map_err<E: std::error::Error + Send + Sync + 'static>(key: &str, err: SdkError<E>) -> MegError {
    match status_of(&err) {
        Some(404) => MegError::NotFoundArchive(key.to_string()),
        _ => MegError::Transport(format!("s3 request for {key:?} failed: {err}")),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> Result<HeadObject> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_err(key, e))?;

        Ok(HeadObject {
            content_type: out.content_type().map(String::from),
            content_length: out.content_length().unwrap_or(0).max(0) as u64,
            accept_ranges: out
                .accept_ranges()
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
            etag: out.e_tag().map(String::from),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| map_err(prefix, e))?;

        Ok(out
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectSummary {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect())
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
        if_none_match: Option<&str>,
    ) -> Result<GetResult> {
        let mut req = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(r) = range {
            req = req.range(format!("bytes={}-{}", r.start, r.end));
        }
        if let Some(etag) = if_none_match {
            req = req.if_none_match(etag);
        }

        let out = match req.send().await {
            Ok(out) => out,
            // A held If-None-Match comes back as an HTTP 304 error from
            // the SDK; surface it as data, not failure.
            Err(err) if status_of(&err) == Some(304) => {
                return Ok(GetResult {
                    body: bytes::Bytes::new(),
                    content_type: None,
                    content_length: None,
                    content_encoding: None,
                    etag: if_none_match.map(String::from),
                    not_modified: true,
                });
            }
            Err(err) => return Err(map_err(key, err)),
        };

        let content_type = out.content_type().map(String::from);
        let content_length = out.content_length().map(|n| n.max(0) as u64);
        let content_encoding = out.content_encoding().map(String::from);
        let etag = out.e_tag().map(String::from);
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| MegError::Transport(format!("reading body of {key:?}: {e}")))?
            .into_bytes();

        Ok(GetResult {
            body,
            content_type,
            content_length,
            content_encoding,
            etag,
            not_modified: false,
        })
    }
}

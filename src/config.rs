//! Startup configuration: CLI flags merged with the environment.

use crate::error::{MegError, Result};
use clap::Parser;
use std::time::Duration;

/// Serve files out of archives stored on S3.
#[derive(Parser, Debug, Default)]
#[command(name = "meg")]
#[command(about = "Serve individual files from archives on an S3-compatible store")]
pub struct Args {
    /// S3 or HTTPS URL of the bucket (s3://bucket, or an endpoint URL)
    #[arg(long, env = "S3_URL")]
    pub url: Option<String>,

    /// AWS region
    #[arg(long, env = "S3_REGION")]
    pub region: Option<String>,

    /// Access key for the store
    #[arg(long, env = "S3_ACCESS_KEY")]
    pub access_key: Option<String>,

    /// Secret key for the store
    #[arg(long, env = "S3_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Bucket name; wins over any bucket embedded in --url
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    /// Interface to bind
    #[arg(long, env = "MEG_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind; PORT is honored when neither flag nor MEG_PORT is set
    #[arg(long, env = "MEG_PORT")]
    pub port: Option<u16>,

    /// Cache backend: in-memory (redis URLs are recognized but not bundled)
    #[arg(long, default_value = "in-memory")]
    pub cache: String,

    /// Serve inner files as attachments
    #[arg(long, env = "MEG_FORCE_DOWNLOAD")]
    pub force_download: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    InMemory,
}

#[derive(Debug, Clone)]
pub struct MegConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub cache: CacheBackend,
    pub force_download: bool,
    pub archive_ttl: Option<Duration>,
}

/// Extract a bucket name from the URL forms the store accepts:
/// `s3://B/…`, `https://B.s3.amazonaws.com/…`, `https://s3.amazonaws.com/B/…`.
/// Anything else with an http scheme is treated as a custom endpoint whose
/// first path segment is the bucket.
pub fn extract_bucket(url: &str) -> Option<(String, Option<String>)> {
    if let Some(rest) = url.strip_prefix("s3://") {
        let bucket = rest.split('/').next()?.to_string();
        return (!bucket.is_empty()).then_some((bucket, None));
    }

    let (scheme, rest) = url.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let (host, path) = match rest.split_once('/') {
        Some((host, path)) => (host, path),
        None => (rest, ""),
    };

    // Virtual-host style: bucket.s3.amazonaws.com or bucket.s3.<region>.amazonaws.com.
    if host.ends_with(".amazonaws.com") {
        if let Some((bucket, tail)) = host.split_once(".s3") {
            if tail.ends_with(".amazonaws.com") || tail == ".amazonaws.com" {
                return (!bucket.is_empty() && bucket != "s3").then(|| (bucket.to_string(), None));
            }
        }
        // Path style: s3.amazonaws.com/bucket/…
        let bucket = path.split('/').next().unwrap_or("");
        return (!bucket.is_empty()).then(|| (bucket.to_string(), None));
    }

    // S3-compatible endpoint with path-style addressing.
    let bucket = path.split('/').next().unwrap_or("");
    (!bucket.is_empty()).then(|| (bucket.to_string(), Some(format!("{scheme}://{host}"))))
}

impl MegConfig {
    /// Validate and merge flags with the environment. Failures here exit
    /// the process with status 1.
    pub fn from_args(args: Args) -> Result<Self> {
        let url_parts = args.url.as_deref().and_then(extract_bucket);

        let bucket = args
            .bucket
            .clone()
            .or_else(|| url_parts.as_ref().map(|(b, _)| b.clone()))
            .ok_or_else(|| {
                MegError::Config("no bucket: pass --bucket, S3_BUCKET, or a bucket URL".into())
            })?;
        let endpoint_url = url_parts.and_then(|(_, endpoint)| endpoint);

        let cache = match args.cache.as_str() {
            "in-memory" => CacheBackend::InMemory,
            other if other.starts_with("redis:") => {
                return Err(MegError::Config(
                    "redis cache backend is not bundled; supported backends: in-memory".into(),
                ))
            }
            other => {
                return Err(MegError::Config(format!(
                    "unknown cache backend {other:?}; supported backends: in-memory"
                )))
            }
        };

        let port = args
            .port
            .or_else(|| {
                std::env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
            })
            .unwrap_or(8080);

        Ok(MegConfig {
            bucket,
            region: args.region,
            endpoint_url,
            access_key: args.access_key,
            secret_key: args.secret_key,
            host: args.host,
            port,
            cache,
            force_download: args.force_download,
            archive_ttl: None,
        })
    }
}

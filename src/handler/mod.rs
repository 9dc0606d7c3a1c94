//! Handler glue: maps a request URL onto the planner and composes a
//! framework-agnostic response. The HTTP harness only has to copy status,
//! headers and body into its own types.

use crate::error::MegError;
use crate::mime::MimeResolver;
use crate::planner::Planner;
use crate::vfs::path::basename;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How much of a body the UTF-8 probe inspects.
const TEXT_PROBE_LEN: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Serve inner files as attachments.
    pub force_download: bool,
    /// Per-deployment archive-body TTL override.
    pub archive_ttl: Option<Duration>,
}

/// A composed response, ready for any HTTP harness.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    fn ok(body: Bytes) -> Self {
        Response {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

pub struct MegHandler {
    planner: Planner,
    mime: Arc<dyn MimeResolver>,
    options: HandlerOptions,
}

impl MegHandler {
    pub fn new(planner: Planner, mime: Arc<dyn MimeResolver>, options: HandlerOptions) -> Self {
        MegHandler {
            planner,
            mime,
            options,
        }
    }

    /// Serve one request path. A single segment names the archive object
    /// itself; anything longer names an entry within it.
    pub async fn handle(&self, url_path: &str) -> Response {
        let trimmed = url_path.trim_matches('/');
        if trimmed.is_empty() {
            return Response {
                status: 404,
                headers: Vec::new(),
                body: Bytes::new(),
            };
        }

        let (archive, inner) = match trimmed.split_once('/') {
            Some((archive, inner)) if !inner.is_empty() => (archive, Some(inner)),
            _ => (trimmed, None),
        };

        match inner {
            None => self.serve_archive(archive).await,
            Some(inner) => self.serve_entry(archive, inner).await,
        }
    }

    async fn serve_archive(&self, name: &str) -> Response {
        match self.planner.fetch_archive(name).await {
            Ok(archive) => {
                let content_type = archive
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Response::ok(archive.body).header("Content-Type", content_type)
            }
            Err(err) => error_response(err),
        }
    }

    async fn serve_entry(&self, name: &str, inner: &str) -> Response {
        let entry = match self
            .planner
            .fetch_entry(name, inner, self.options.archive_ttl)
            .await
        {
            Ok(entry) => entry,
            Err(err) => return error_response(err),
        };

        let content_type = match self.mime.resolve(inner) {
            // Successful text gets its charset declared.
            Some(ct) if ct.starts_with("text/") && looks_like_utf8(&entry.body) => {
                format!("{ct}; charset=utf-8")
            }
            Some(ct) => ct,
            // No name-based answer: probe the first chunk for UTF-8 text.
            None if looks_like_utf8(&entry.body) => "text/plain; charset=utf-8".to_string(),
            None => "application/octet-stream".to_string(),
        };

        let mut response = Response::ok(entry.body).header("Content-Type", content_type);
        if self.options.force_download {
            response = response.header(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", basename(inner)),
            );
        }
        response
    }
}

/// True when the probed prefix decodes as UTF-8, tolerating a multi-byte
/// character cut off by the probe boundary.
fn looks_like_utf8(body: &[u8]) -> bool {
    let sample = &body[..body.len().min(TEXT_PROBE_LEN)];
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // An incomplete final character only excuses a truncated sample.
        Err(err) => sample.len() < body.len() && err.error_len().is_none(),
    }
}

fn error_response(err: MegError) -> Response {
    debug!(error = %err, "request failed");
    let (status, body) = match &err {
        // Diagnostics help when a format is simply unregistered; plain
        // missing paths stay bodyless.
        MegError::UnknownFormat(_) => (404, Bytes::from(err.to_string())),
        _ if err.is_not_found() => (404, Bytes::new()),
        _ => (500, Bytes::from(err.to_string())),
    };
    Response {
        status,
        headers: Vec::new(),
        body,
    }
}

//! Content-type resolution for response headers and stored-key
//! disambiguation.

use std::collections::HashMap;

/// Maps a path to a content type by its extension. Implementations only
/// answer from names; byte sniffing is the handler's UTF-8 probe.
pub trait MimeResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Table-driven resolver seeded with the common web types plus every
/// archive/compression type the format registry serves.
pub struct ExtensionMimeResolver {
    by_extension: HashMap<String, String>,
}

impl ExtensionMimeResolver {
    pub fn new() -> Self {
        let mut resolver = ExtensionMimeResolver {
            by_extension: HashMap::new(),
        };
        for (ext, ct) in [
            ("txt", "text/plain"),
            ("md", "text/markdown"),
            ("html", "text/html"),
            ("htm", "text/html"),
            ("css", "text/css"),
            ("csv", "text/csv"),
            ("js", "text/javascript"),
            ("json", "application/json"),
            ("xml", "application/xml"),
            ("yaml", "application/yaml"),
            ("yml", "application/yaml"),
            ("toml", "application/toml"),
            ("pdf", "application/pdf"),
            ("wasm", "application/wasm"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("gif", "image/gif"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("ico", "image/x-icon"),
            ("mp3", "audio/mpeg"),
            ("mp4", "video/mp4"),
            ("woff2", "font/woff2"),
            ("zip", "application/zip"),
            ("tar", "application/x-tar"),
            ("gz", "application/gzip"),
            ("tgz", "application/gzip"),
            ("bz2", "application/x-bzip2"),
        ] {
            resolver.register(ext, ct);
        }
        resolver
    }

    /// Add or override a mapping; later registrations win, so formats
    /// registered at startup can claim their extensions.
    pub fn register(&mut self, extension: &str, content_type: &str) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), content_type.to_string());
    }
}

impl Default for ExtensionMimeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MimeResolver for ExtensionMimeResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        let name = path.rsplit('/').next()?;
        let ext = name.rsplit('.').next()?;
        if ext == name {
            return None;
        }
        self.by_extension.get(&ext.to_ascii_lowercase()).cloned()
    }
}

//! Archive and compression formats, and the registry that resolves them.
//!
//! Formats follow a two-stage model: a [`CompressionFormat`] is a total
//! bytes→bytes decoder, an [`ArchiveFormat`] is a total bytes→Archive
//! decoder, and a [`DualPartArchiveFormat`] composes one of each with the
//! compression layer applied first. Instead of a type hierarchy, the
//! archive trait carries capability probes (`seekable`, `compression_layer`)
//! that concrete codecs opt into.

pub mod gzip;
pub mod tar;
pub mod zip;

use crate::archive::{Archive, ArchiveEntry, ArchiveIndex, ByteRange, SeekableArchiveMetadata};
use crate::archive::CompressionKind;
use crate::error::{MegError, Result};
use std::sync::Arc;

pub use gzip::{Bzip2Format, GzipFormat};
pub use tar::TarFormat;
pub use zip::ZipFormat;

/// A total function from a compressed byte stream to its decoded bytes.
pub trait CompressionFormat: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn extensions(&self) -> &'static [&'static str];
    fn content_types(&self) -> &'static [&'static str];
    /// Fixed byte prefix identifying the format, when one exists.
    fn magic(&self) -> Option<&'static [u8]>;
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFormat").field("name", &self.name()).finish()
    }
}

/// A container format decoding raw bytes into an [`Archive`].
pub trait ArchiveFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn content_types(&self) -> &'static [&'static str];
    /// Magic bytes of the outermost layer. For a dual-part format this is
    /// the compression layer's prefix; the container's own magic applies to
    /// the decompressed bytes.
    fn magic(&self) -> Option<&'static [u8]>;
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<Archive>;

    /// The seekable view of this format, when per-entry range access is
    /// supported.
    fn seekable(&self) -> Option<&dyn SeekableArchiveFormat> {
        None
    }

    /// The compression layer, for dual-part formats.
    fn compression_layer(&self) -> Option<&dyn CompressionFormat> {
        None
    }
}

/// Per-entry range access for formats with a central index.
pub trait SeekableArchiveFormat: Send + Sync {
    /// Byte ranges likely to contain the central index, most likely first.
    fn index_hint_ranges(&self, total_len: u64) -> Vec<ByteRange>;

    /// Decode the central index from `tail`, the bytes of the first hint
    /// range. `total_len` locates `tail` within the object.
    fn decode_index(&self, tail: &[u8], total_len: u64) -> Result<ArchiveIndex>;

    /// Decode a single entry from `bytes`, the archive bytes covering the
    /// index record's `[offset, offset+length-1]` range.
    fn decode_entry(&self, bytes: &[u8], meta: &SeekableArchiveMetadata) -> Result<ArchiveEntry>;
}

/// `compression ∘ container`: gzip-over-tar and friends.
pub struct DualPartArchiveFormat {
    name: &'static str,
    extensions: &'static [&'static str],
    compression: Arc<dyn CompressionFormat>,
    container: Arc<dyn ArchiveFormat>,
}

impl DualPartArchiveFormat {
    pub fn new(
        name: &'static str,
        extensions: &'static [&'static str],
        compression: Arc<dyn CompressionFormat>,
        container: Arc<dyn ArchiveFormat>,
    ) -> Self {
        DualPartArchiveFormat {
            name,
            extensions,
            compression,
            container,
        }
    }
}

impl ArchiveFormat for DualPartArchiveFormat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn content_types(&self) -> &'static [&'static str] {
        self.container.content_types()
    }

    fn magic(&self) -> Option<&'static [u8]> {
        self.compression.magic()
    }

    fn decode(&self, name: &str, bytes: &[u8]) -> Result<Archive> {
        if let Some(magic) = self.compression.magic() {
            if !bytes.starts_with(magic) {
                return Err(MegError::MagicMismatch(self.name));
            }
        }
        let inner = self.compression.decode(bytes)?;
        if let Some(magic) = self.container.magic() {
            if !inner.starts_with(magic) {
                return Err(MegError::MagicMismatch(self.name));
            }
        }
        self.container.decode(name, &inner)
    }

    fn compression_layer(&self) -> Option<&dyn CompressionFormat> {
        Some(self.compression.as_ref())
    }
}

/// The default `tar+gzip` dual-part format.
pub fn tar_gz() -> Arc<dyn ArchiveFormat> {
    Arc::new(DualPartArchiveFormat::new(
        "tar+gzip",
        &["tar.gz", "tgz", "taz"],
        Arc::new(GzipFormat),
        Arc::new(TarFormat),
    ))
}

/// `tar+bzip2`, available for registration alongside the defaults.
pub fn tar_bz2() -> Arc<dyn ArchiveFormat> {
    Arc::new(DualPartArchiveFormat::new(
        "tar+bzip2",
        &["tar.bz2", "tbz2"],
        Arc::new(Bzip2Format),
        Arc::new(TarFormat),
    ))
}

/// Ordered, process-wide list of archive formats.
///
/// Resolution tries, in order: magic-byte prefix, extension of a supplied
/// filename, exhaustive trial decode. Duplicate content-types are allowed;
/// the first registered match wins.
pub struct FormatRegistry {
    formats: Vec<Arc<dyn ArchiveFormat>>,
}

impl FormatRegistry {
    /// The default registry: `[tar+gzip, zip]`.
    pub fn with_defaults() -> Self {
        FormatRegistry {
            formats: vec![tar_gz(), Arc::new(ZipFormat)],
        }
    }

    pub fn empty() -> Self {
        FormatRegistry {
            formats: Vec::new(),
        }
    }

    /// Append a format with lower precedence than everything registered.
    pub fn register(&mut self, format: Arc<dyn ArchiveFormat>) {
        self.formats.push(format);
    }

    /// Prepend a format, giving it highest precedence.
    pub fn register_front(&mut self, format: Arc<dyn ArchiveFormat>) {
        self.formats.insert(0, format);
    }

    pub fn formats(&self) -> &[Arc<dyn ArchiveFormat>] {
        &self.formats
    }

    /// First format whose magic bytes prefix `head`.
    pub fn by_magic(&self, head: &[u8]) -> Option<&Arc<dyn ArchiveFormat>> {
        self.formats
            .iter()
            .find(|f| f.magic().is_some_and(|m| head.starts_with(m)))
    }

    /// First format one of whose extensions suffixes `filename`.
    pub fn by_filename(&self, filename: &str) -> Option<&Arc<dyn ArchiveFormat>> {
        let lower = filename.to_ascii_lowercase();
        self.formats.iter().find(|f| {
            f.extensions()
                .iter()
                .any(|ext| lower.ends_with(&format!(".{ext}")))
        })
    }

    /// First format matching `content_type` on either its own layer or,
    /// for dual-part formats, its compression layer. HEAD responses carry
    /// the compression layer's type for e.g. tar.gz uploads.
    pub fn by_content_type(&self, content_type: &str) -> Option<&Arc<dyn ArchiveFormat>> {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.formats.iter().find(|f| {
            f.content_types().contains(&ct)
                || f.compression_layer()
                    .is_some_and(|c| c.content_types().contains(&ct))
        })
    }

    /// Full three-stage resolution over the complete archive bytes:
    /// magic prefix, then filename extension, then trial decode. The trial
    /// stage returns the decoded archive so callers don't decode twice.
    pub fn resolve(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(Arc<dyn ArchiveFormat>, Archive)> {
        if let Some(f) = self.by_magic(bytes) {
            let archive = f.decode(filename, bytes)?;
            return Ok((Arc::clone(f), archive));
        }
        if let Some(f) = self.by_filename(filename) {
            let archive = f.decode(filename, bytes)?;
            return Ok((Arc::clone(f), archive));
        }
        for f in &self.formats {
            if let Ok(archive) = f.decode(filename, bytes) {
                return Ok((Arc::clone(f), archive));
            }
        }
        Err(MegError::UnknownFormat(filename.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct FakeFormat;

    impl ArchiveFormat for FakeFormat {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["fake"]
        }
        fn content_types(&self) -> &'static [&'static str] {
            &["application/x-fake"]
        }
        fn magic(&self) -> Option<&'static [u8]> {
            Some(b"FAKE")
        }
        fn decode(&self, name: &str, bytes: &[u8]) -> Result<Archive> {
            if !bytes.starts_with(b"FAKE") {
                return Err(MegError::decode("not fake"));
            }
            let mut a = Archive::new(name, "fake");
            a.upsert(ArchiveEntry::file(
                "payload",
                Bytes::copy_from_slice(&bytes[4..]),
            ));
            Ok(a)
        }
    }

    #[test]
    fn defaults_are_targz_then_zip() {
        let reg = FormatRegistry::with_defaults();
        let names: Vec<_> = reg.formats().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["tar+gzip", "zip"]);
    }

    #[test]
    fn magic_takes_precedence_over_filename() {
        let mut reg = FormatRegistry::with_defaults();
        reg.register(Arc::new(FakeFormat));

        // A .zip filename with FAKE magic resolves to the fake format.
        let (f, archive) = reg.resolve("payload.zip", b"FAKEhello").unwrap();
        assert_eq!(f.name(), "fake");
        assert_eq!(archive.get("payload").unwrap().data.as_ref(), b"hello");
    }

    #[test]
    fn extension_match_is_suffix_based_and_case_insensitive() {
        let reg = FormatRegistry::with_defaults();
        assert_eq!(reg.by_filename("a.TAR.GZ").unwrap().name(), "tar+gzip");
        assert_eq!(reg.by_filename("b.tgz").unwrap().name(), "tar+gzip");
        assert_eq!(reg.by_filename("c.zip").unwrap().name(), "zip");
        assert!(reg.by_filename("plain.txt").is_none());
    }

    #[test]
    fn content_type_matches_either_dualpart_layer() {
        let reg = FormatRegistry::with_defaults();
        // The compression layer's type…
        assert_eq!(
            reg.by_content_type("application/gzip").unwrap().name(),
            "tar+gzip"
        );
        // …and the container's type both land on tar+gzip.
        assert_eq!(
            reg.by_content_type("application/x-tar").unwrap().name(),
            "tar+gzip"
        );
        assert_eq!(reg.by_content_type("application/zip").unwrap().name(), "zip");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let reg = FormatRegistry::with_defaults();
        assert!(reg
            .by_content_type("application/zip; charset=binary")
            .is_some());
    }

    #[test]
    fn first_registered_wins_on_duplicate_content_type() {
        struct ZipClone;
        impl ArchiveFormat for ZipClone {
            fn name(&self) -> &'static str {
                "zip-clone"
            }
            fn extensions(&self) -> &'static [&'static str] {
                &["zip"]
            }
            fn content_types(&self) -> &'static [&'static str] {
                &["application/zip"]
            }
            fn magic(&self) -> Option<&'static [u8]> {
                None
            }
            fn decode(&self, _: &str, _: &[u8]) -> Result<Archive> {
                Err(MegError::decode("unimplemented"))
            }
        }

        let mut reg = FormatRegistry::with_defaults();
        reg.register_front(Arc::new(ZipClone));
        assert_eq!(
            reg.by_content_type("application/zip").unwrap().name(),
            "zip-clone"
        );
    }

    #[test]
    fn unknown_bytes_fail_with_unknown_format() {
        let reg = FormatRegistry::with_defaults();
        let err = reg.resolve("mystery.bin", b"\x00\x01\x02\x03").unwrap_err();
        assert!(matches!(err, MegError::UnknownFormat(_)));
    }

    #[test]
    fn dualpart_rejects_wrong_outer_magic() {
        let f = tar_gz();
        let err = f.decode("x.tar.gz", b"PK\x03\x04junk").unwrap_err();
        assert!(matches!(err, MegError::MagicMismatch("tar+gzip")));
    }

    fn tarball(path: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = ::tar::Builder::new(Vec::new());
        let mut header = ::tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, contents).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn targz_decodes_through_both_layers() {
        use std::io::Write;
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&tarball("README", b"MEG")).unwrap();
        let bytes = enc.finish().unwrap();

        let (format, archive) = FormatRegistry::with_defaults()
            .resolve("src.tar.gz", &bytes)
            .unwrap();
        assert_eq!(format.name(), "tar+gzip");
        assert_eq!(archive.get("README").unwrap().data.as_ref(), b"MEG");
    }

    #[test]
    fn custom_tarbz2_registration_resolves_and_decodes() {
        use std::io::Write;
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(&tarball("notes.txt", b"squeezed")).unwrap();
        let bytes = enc.finish().unwrap();

        let mut reg = FormatRegistry::with_defaults();
        reg.register(tar_bz2());

        let (format, archive) = reg.resolve("notes.tar.bz2", &bytes).unwrap();
        assert_eq!(format.name(), "tar+bzip2");
        assert_eq!(archive.get("notes.txt").unwrap().data.as_ref(), b"squeezed");
    }
}

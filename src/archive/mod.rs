//! In-memory representation of a decoded archive.
//!
//! `Archive` values are immutable once a format decoder has produced them;
//! the caches own compressed bytes and indices, and decoded archives are
//! derived per request and discarded afterwards.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::SystemTime;

/// A closed byte interval `[start, end]`, as used by ranged store reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        ByteRange { start, end }
    }

    /// The trailing `len` bytes of an object of `total` bytes.
    pub fn suffix(total: u64, len: u64) -> Self {
        let len = len.min(total).max(1);
        ByteRange {
            start: total.saturating_sub(len),
            end: total.saturating_sub(1),
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Compression applied to an entry's stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lzma,
    Lz4,
    Snappy,
    Lzip,
    Lzop,
    Compress,
    Deflate,
    Brotli,
    /// A user-declared tag for formats registered at runtime.
    Other(String),
}

impl CompressionKind {
    pub fn as_str(&self) -> &str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Bzip2 => "bzip2",
            CompressionKind::Xz => "xz",
            CompressionKind::Zstd => "zstd",
            CompressionKind::Lzma => "lzma",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Snappy => "snappy",
            CompressionKind::Lzip => "lzip",
            CompressionKind::Lzop => "lzop",
            CompressionKind::Compress => "compress",
            CompressionKind::Deflate => "deflate",
            CompressionKind::Brotli => "brotli",
            CompressionKind::Other(tag) => tag,
        }
    }
}

impl Default for CompressionKind {
    fn default() -> Self {
        CompressionKind::None
    }
}

/// What an archive entry was on the filesystem it was packed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Hardlink,
    Fifo,
    CharDevice,
    BlockDevice,
    Socket,
}

impl EntryKind {
    pub fn is_link(&self) -> bool {
        matches!(self, EntryKind::Symlink | EntryKind::Hardlink)
    }
}

/// Format a CRC-32 checksum the way index records carry it: lowercase hex,
/// zero-padded to 8 characters.
pub fn crc32_hex(crc: u32) -> String {
    format!("{crc:08x}")
}

/// Per-entry metadata common to all formats.
#[derive(Debug, Clone, Default)]
pub struct ArchiveMetadata {
    pub compression: CompressionKind,
    pub uncompressed_size: Option<u64>,
    pub crc: Option<String>,
}

/// Metadata for an entry reachable by a ranged read: where its compressed
/// body sits within the archive object.
#[derive(Debug, Clone)]
pub struct SeekableArchiveMetadata {
    pub compression: CompressionKind,
    pub uncompressed_size: Option<u64>,
    pub crc: Option<String>,
    /// Byte position of the entry's compressed body within the archive.
    pub offset: u64,
    /// Compressed byte length.
    pub length: u64,
}

impl SeekableArchiveMetadata {
    /// The closed range `[offset, offset+length-1]` a planner fetches.
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.offset + self.length - 1)
    }

    pub fn to_metadata(&self) -> ArchiveMetadata {
        ArchiveMetadata {
            compression: self.compression.clone(),
            uncompressed_size: self.uncompressed_size,
            crc: self.crc.clone(),
        }
    }
}

/// One decoded member of an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// POSIX-style relative path, no leading slash.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub mode: Option<u32>,
    /// Decoded bytes. Empty for non-file kinds, except links, whose data
    /// holds the target path in the entry's text encoding (UTF-8 unless a
    /// format declares otherwise).
    pub data: Bytes,
    /// Link target for symlink/hardlink entries.
    pub link: Option<String>,
    pub metadata: ArchiveMetadata,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, data: Bytes) -> Self {
        let size = data.len() as u64;
        ArchiveEntry {
            path: path.into(),
            size,
            kind: EntryKind::File,
            modified: None,
            accessed: None,
            created: None,
            mode: None,
            data,
            link: None,
            metadata: ArchiveMetadata::default(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        ArchiveEntry {
            path: path.into(),
            size: 0,
            kind: EntryKind::Directory,
            modified: None,
            accessed: None,
            created: None,
            mode: None,
            data: Bytes::new(),
            link: None,
            metadata: ArchiveMetadata::default(),
        }
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        ArchiveEntry {
            path: path.into(),
            size: 0,
            kind: EntryKind::Symlink,
            modified: None,
            accessed: None,
            created: None,
            mode: None,
            data: Bytes::from(target.clone().into_bytes()),
            link: Some(target),
            metadata: ArchiveMetadata::default(),
        }
    }

    /// `basename(path)`.
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }

    /// The link target for link-kinded entries. Falls back to decoding
    /// `data` as UTF-8 with trailing whitespace trimmed, the way symlinks
    /// without an explicit target field are stored.
    pub fn link_target(&self) -> Option<String> {
        if !self.kind.is_link() {
            return None;
        }
        if let Some(link) = &self.link {
            return Some(link.clone());
        }
        std::str::from_utf8(&self.data)
            .ok()
            .map(|s| s.trim_end().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// A named, ordered collection of entries plus the format that decoded it.
#[derive(Debug, Clone)]
pub struct Archive {
    name: String,
    format: &'static str,
    comment: Option<String>,
    entries: Vec<ArchiveEntry>,
    by_path: HashMap<String, usize>,
    index: Option<ArchiveIndex>,
}

impl Archive {
    pub fn new(name: impl Into<String>, format: &'static str) -> Self {
        Archive {
            name: name.into(),
            format,
            comment: None,
            entries: Vec::new(),
            by_path: HashMap::new(),
            index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// The central index, for archives decoded by a seekable format.
    pub fn index(&self) -> Option<&ArchiveIndex> {
        self.index.as_ref()
    }

    pub fn set_index(&mut self, index: ArchiveIndex) {
        self.index = Some(index);
    }

    /// Insert an entry, replacing any earlier entry with the same path.
    /// Paths are unique per archive; formats that permit re-added members
    /// (tar does) keep the last occurrence.
    pub fn upsert(&mut self, entry: ArchiveEntry) {
        let key = entry.path.trim_end_matches('/').to_string();
        match self.by_path.get(&key) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.by_path.insert(key, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Look up an entry by path, tolerating a trailing slash.
    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        self.by_path
            .get(path.trim_end_matches('/'))
            .map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A central index: path → seekable metadata, in the order the decoder
/// produced it, plus an optional archive comment.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<(String, SeekableArchiveMetadata)>,
    by_path: HashMap<String, usize>,
    comment: Option<String>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, meta: SeekableArchiveMetadata) {
        let path = path.into();
        let key = path.trim_end_matches('/').to_string();
        match self.by_path.get(&key) {
            Some(&i) => self.entries[i] = (path, meta),
            None => {
                self.by_path.insert(key, self.entries.len());
                self.entries.push((path, meta));
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&SeekableArchiveMetadata> {
        self.by_path
            .get(path.trim_end_matches('/'))
            .map(|&i| &self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SeekableArchiveMetadata)> {
        self.entries.iter().map(|(p, m)| (p.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_suffix_clamps_to_object() {
        let r = ByteRange::suffix(100, 65536);
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 99);
        assert_eq!(r.len(), 100);

        let r = ByteRange::suffix(1_000_000, 65536);
        assert_eq!(r.start, 1_000_000 - 65536);
        assert_eq!(r.end, 999_999);
    }

    #[test]
    fn crc_is_lowercase_zero_padded() {
        assert_eq!(crc32_hex(0xDEADBEEF), "deadbeef");
        assert_eq!(crc32_hex(0x1A), "0000001a");
    }

    #[test]
    fn upsert_keeps_last_occurrence_and_order() {
        let mut a = Archive::new("a.tar", "tar");
        a.upsert(ArchiveEntry::file("x", Bytes::from_static(b"one")));
        a.upsert(ArchiveEntry::file("y", Bytes::from_static(b"two")));
        a.upsert(ArchiveEntry::file("x", Bytes::from_static(b"three")));

        assert_eq!(a.len(), 2);
        assert_eq!(a.entries()[0].data.as_ref(), b"three");
        assert_eq!(a.get("x").unwrap().data.as_ref(), b"three");
    }

    #[test]
    fn directory_lookup_ignores_trailing_slash() {
        let mut a = Archive::new("a.zip", "zip");
        a.upsert(ArchiveEntry::directory("docs/"));
        assert!(a.get("docs").is_some());
        assert!(a.get("docs/").is_some());
    }

    #[test]
    fn link_target_falls_back_to_data() {
        let mut e = ArchiveEntry::file("ln", Bytes::from_static(b"target/file\n"));
        e.kind = EntryKind::Symlink;
        assert_eq!(e.link_target().as_deref(), Some("target/file"));
    }

    #[test]
    fn seekable_metadata_range_is_closed() {
        let m = SeekableArchiveMetadata {
            compression: CompressionKind::Deflate,
            uncompressed_size: Some(10),
            crc: None,
            offset: 100,
            length: 40,
        };
        assert_eq!(m.range(), ByteRange::new(100, 139));
        assert_eq!(m.range().len(), 40);
    }

    #[test]
    fn index_preserves_insertion_order() {
        let meta = |off| SeekableArchiveMetadata {
            compression: CompressionKind::None,
            uncompressed_size: None,
            crc: None,
            offset: off,
            length: 1,
        };
        let mut idx = ArchiveIndex::new();
        idx.insert("z", meta(0));
        idx.insert("a", meta(10));
        idx.insert("m", meta(20));
        let order: Vec<_> = idx.iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["z", "a", "m"]);
    }
}

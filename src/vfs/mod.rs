//! Read-only file-system view over a decoded archive.
//!
//! The view is deliberately minimal: `stat`, `entry_type`, `list`, `read`
//! and `resolve_link`. Mutating operations do not exist on the type, so
//! write access is unrepresentable rather than a runtime error.

pub mod path;

use crate::archive::{Archive, ArchiveEntry, EntryKind};
use crate::error::{MegError, Result};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Hop limit for symlink resolution; chains longer than this are treated
/// as cycles.
pub const SYMLINK_DEPTH_LIMIT: usize = 40;

/// What a path resolves to, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Link,
    Pipe,
    UnixSocket,
    NotFound,
}

impl FileType {
    fn of(kind: EntryKind) -> FileType {
        match kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::Symlink | EntryKind::Hardlink => FileType::Link,
            EntryKind::Fifo => FileType::Pipe,
            EntryKind::Socket => FileType::UnixSocket,
            // Device nodes read as files for the purposes of this view.
            EntryKind::File | EntryKind::CharDevice | EntryKind::BlockDevice => FileType::File,
        }
    }
}

/// Stat result: either an entry's own metadata or a synthetic directory
/// aggregated from its children.
#[derive(Debug, Clone)]
pub struct FsStat {
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
    pub mode: Option<u32>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

/// One listing row; synthesized directories carry no backing entry.
#[derive(Debug, Clone)]
pub struct FsEntry {
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
}

pub struct ArchiveFs<'a> {
    archive: &'a Archive,
}

impl<'a> ArchiveFs<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        ArchiveFs { archive }
    }

    pub fn archive(&self) -> &Archive {
        self.archive
    }

    /// Entries strictly below `prefix` (everything, for an empty prefix).
    fn children(&self, prefix: &str) -> impl Iterator<Item = &ArchiveEntry> {
        let want = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        self.archive
            .entries()
            .iter()
            .filter(move |e| want.is_empty() || e.path.starts_with(&want))
    }

    /// Whether `prefix` sits on a segment boundary of at least one entry.
    fn is_implicit_dir(&self, prefix: &str) -> bool {
        self.children(prefix).next().is_some()
    }

    pub fn stat(&self, raw_path: &str) -> Result<FsStat> {
        let p = path::normalize(raw_path);

        if let Some(entry) = self.archive.get(&p).filter(|_| !p.is_empty()) {
            return Ok(FsStat {
                path: p,
                file_type: FileType::of(entry.kind),
                size: entry.size,
                mode: entry.mode,
                modified: entry.modified,
                accessed: entry.accessed,
                created: entry.created,
            });
        }

        if p.is_empty() || self.is_implicit_dir(&p) {
            let mut size = 0;
            let mut modified = None;
            let mut accessed = None;
            let mut created = None;
            for child in self.children(&p) {
                size += child.size;
                modified = modified.max(child.modified);
                accessed = accessed.max(child.accessed);
                created = created.max(child.created);
            }
            return Ok(FsStat {
                path: p,
                file_type: FileType::Directory,
                size,
                mode: Some(0o755),
                modified,
                accessed,
                created,
            });
        }

        Err(MegError::NotFoundEntry(p))
    }

    /// Resolve what `raw_path` is. With `follow_links`, link entries are
    /// chased to their final target; a chain longer than
    /// [`SYMLINK_DEPTH_LIMIT`] hops reports `NotFound`.
    pub fn entry_type(&self, raw_path: &str, follow_links: bool) -> FileType {
        let p = path::normalize(raw_path);
        match self.resolve(&p, follow_links, 0) {
            Ok(Some(entry)) => FileType::of(entry.kind),
            Ok(None) if p.is_empty() || self.is_implicit_dir(&p) => FileType::Directory,
            Ok(None) => FileType::NotFound,
            Err(_) => FileType::NotFound,
        }
    }

    /// Look up an entry, optionally chasing links. `Ok(None)` means the
    /// path names no explicit entry (it may still be an implicit
    /// directory).
    fn resolve(
        &self,
        normalized: &str,
        follow_links: bool,
        depth: usize,
    ) -> Result<Option<&ArchiveEntry>> {
        if depth > SYMLINK_DEPTH_LIMIT {
            return Err(MegError::LoopDetected {
                path: normalized.to_string(),
                max: SYMLINK_DEPTH_LIMIT,
            });
        }
        let Some(entry) = self.archive.get(normalized) else {
            return Ok(None);
        };
        if follow_links && entry.kind.is_link() {
            let Some(target) = entry.link_target() else {
                return Ok(Some(entry));
            };
            let next = path::join_link(&entry.path, &target);
            return self.resolve(&next, true, depth + 1);
        }
        Ok(Some(entry))
    }

    /// Fully resolve a link entry to its target path.
    pub fn resolve_link(&self, raw_path: &str) -> Result<String> {
        let p = path::normalize(raw_path);
        match self.resolve(&p, true, 0)? {
            Some(entry) => Ok(entry.path.trim_end_matches('/').to_string()),
            None => Err(MegError::NotFoundEntry(p)),
        }
    }

    /// List entries under `raw_path`. Without `recursive`, immediate
    /// sub-paths that have no explicit entry are synthesized as
    /// directories; with `follow_links`, link entries are dereferenced
    /// before being yielded (dangling links are yielded as-is).
    pub fn list(&self, raw_path: &str, recursive: bool, follow_links: bool) -> Result<Vec<FsEntry>> {
        let p = path::normalize(raw_path);
        if !p.is_empty() && self.archive.get(&p).is_none() && !self.is_implicit_dir(&p) {
            return Err(MegError::NotFoundEntry(p));
        }

        let mut rows = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        let strip = if p.is_empty() {
            String::new()
        } else {
            format!("{p}/")
        };

        for entry in self.children(&p) {
            let relative = entry.path.strip_prefix(&strip).unwrap_or(&entry.path);
            let relative = relative.trim_end_matches('/');
            if relative.is_empty() {
                continue;
            }

            if !recursive {
                if let Some(slash) = relative.find('/') {
                    // Nested entry: surface its first segment once, as a
                    // directory, whether or not the archive has an
                    // explicit entry for it.
                    let dir = &relative[..slash];
                    if seen_dirs.insert(dir.to_string()) {
                        let full = format!("{strip}{dir}");
                        rows.push(FsEntry {
                            file_type: FileType::Directory,
                            size: 0,
                            path: full,
                        });
                    }
                    continue;
                }
            }

            if !recursive && entry.kind == EntryKind::Directory && !seen_dirs.insert(relative.to_string())
            {
                // Already surfaced as a synthesized directory.
                continue;
            }

            let yielded = if follow_links && entry.kind.is_link() {
                match self.resolve(entry.path.trim_end_matches('/'), true, 0) {
                    Ok(Some(target)) => target,
                    _ => entry,
                }
            } else {
                entry
            };
            rows.push(FsEntry {
                path: entry.path.trim_end_matches('/').to_string(),
                file_type: FileType::of(yielded.kind),
                size: yielded.size,
            });
        }

        Ok(rows)
    }

    /// Look up the entry a path ultimately names, following links. Paths
    /// that resolve to no file-kinded entry are reported as missing.
    pub fn entry(&self, raw_path: &str) -> Result<&ArchiveEntry> {
        let p = path::normalize(raw_path);
        match self.resolve(&p, true, 0)? {
            Some(entry)
                if matches!(
                    entry.kind,
                    EntryKind::File | EntryKind::CharDevice | EntryKind::BlockDevice
                ) =>
            {
                Ok(entry)
            }
            Some(_) | None => Err(MegError::NotFoundEntry(p)),
        }
    }

    /// The decoded bytes of a file entry. Links are followed; anything
    /// that is not ultimately a file is reported as missing.
    pub fn read(&self, raw_path: &str) -> Result<Bytes> {
        self.entry(raw_path).map(|entry| entry.data.clone())
    }
}

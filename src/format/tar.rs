//! Tar container format.

use super::ArchiveFormat;
use crate::archive::{Archive, ArchiveEntry, ArchiveMetadata, CompressionKind, EntryKind};
use crate::error::{MegError, Result};
use bytes::Bytes;
use std::io::{Cursor, Read};
use std::time::{Duration, UNIX_EPOCH};

pub struct TarFormat;

impl TarFormat {
    fn entry_kind(t: ::tar::EntryType) -> Option<EntryKind> {
        use ::tar::EntryType;
        match t {
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                Some(EntryKind::File)
            }
            EntryType::Directory => Some(EntryKind::Directory),
            EntryType::Symlink => Some(EntryKind::Symlink),
            EntryType::Link => Some(EntryKind::Hardlink),
            EntryType::Fifo => Some(EntryKind::Fifo),
            EntryType::Char => Some(EntryKind::CharDevice),
            EntryType::Block => Some(EntryKind::BlockDevice),
            // Extended headers are consumed by the reader itself; anything
            // else has no filesystem counterpart worth projecting.
            _ => None,
        }
    }
}

impl ArchiveFormat for TarFormat {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tar"]
    }

    fn content_types(&self) -> &'static [&'static str] {
        &["application/x-tar", "application/tar"]
    }

    /// Tar's `ustar` marker sits at offset 257, not at the start, so there
    /// is no usable byte prefix.
    fn magic(&self) -> Option<&'static [u8]> {
        None
    }

    fn decode(&self, name: &str, bytes: &[u8]) -> Result<Archive> {
        let mut reader = ::tar::Archive::new(Cursor::new(bytes));
        let mut archive = Archive::new(name, self.name());

        for entry in reader.entries().map_err(MegError::decode)? {
            let mut entry = entry.map_err(MegError::decode)?;
            let Some(kind) = Self::entry_kind(entry.header().entry_type()) else {
                continue;
            };

            let path = entry
                .path()
                .map_err(MegError::decode)?
                .to_string_lossy()
                .trim_start_matches("./")
                .trim_start_matches('/')
                .to_string();
            if path.is_empty() {
                continue;
            }

            let header = entry.header();
            let size = header.size().map_err(MegError::decode)?;
            let mode = header.mode().ok();
            let modified = header
                .mtime()
                .ok()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
            let (accessed, created) = match header.as_gnu() {
                Some(gnu) => (
                    gnu.atime().ok().map(|s| UNIX_EPOCH + Duration::from_secs(s)),
                    gnu.ctime().ok().map(|s| UNIX_EPOCH + Duration::from_secs(s)),
                ),
                None => (None, None),
            };

            let link = entry
                .link_name()
                .map_err(MegError::decode)?
                .map(|p| p.to_string_lossy().to_string());

            let (data, size) = match kind {
                EntryKind::File => {
                    let mut buf = Vec::with_capacity(size as usize);
                    entry.read_to_end(&mut buf).map_err(MegError::decode)?;
                    let len = buf.len() as u64;
                    (Bytes::from(buf), len)
                }
                // Link data holds the target path so the entry round-trips
                // without consulting the link field.
                EntryKind::Symlink | EntryKind::Hardlink => (
                    Bytes::from(link.clone().unwrap_or_default().into_bytes()),
                    0,
                ),
                _ => (Bytes::new(), 0),
            };

            archive.upsert(ArchiveEntry {
                path,
                size,
                kind,
                modified,
                accessed,
                created,
                mode,
                data,
                link,
                metadata: ArchiveMetadata {
                    compression: CompressionKind::None,
                    uncompressed_size: Some(size),
                    crc: None,
                },
            });
        }

        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar() -> Vec<u8> {
        let mut builder = ::tar::Builder::new(Vec::new());

        let mut header = ::tar::Header::new_gnu();
        header.set_size(6);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder
            .append_data(&mut header, "docs/readme.txt", &b"hello\n"[..])
            .unwrap();

        let mut dir = ::tar::Header::new_gnu();
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_entry_type(::tar::EntryType::Directory);
        dir.set_cksum();
        builder.append_data(&mut dir, "docs/", &[][..]).unwrap();

        let mut link = ::tar::Header::new_gnu();
        link.set_size(0);
        link.set_entry_type(::tar::EntryType::Symlink);
        link.set_cksum();
        builder
            .append_link(&mut link, "docs/latest", "readme.txt")
            .unwrap();

        builder.into_inner().unwrap()
    }

    #[test]
    fn decodes_files_directories_and_links() {
        let bytes = build_tar();
        let archive = TarFormat.decode("fixture.tar", &bytes).unwrap();

        let file = archive.get("docs/readme.txt").unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.data.as_ref(), b"hello\n");
        assert_eq!(file.size, 6);
        assert_eq!(file.mode, Some(0o644));
        assert_eq!(
            file.modified.unwrap(),
            UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );

        let dir = archive.get("docs").unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.size, 0);
        assert!(dir.data.is_empty());

        let link = archive.get("docs/latest").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target().as_deref(), Some("readme.txt"));
        // Invariant: link data decodes back to the target.
        assert_eq!(link.data.as_ref(), b"readme.txt");
    }

    #[test]
    fn truncated_tar_fails_to_decode() {
        let bytes = build_tar();
        assert!(TarFormat.decode("bad.tar", &bytes[..100]).is_err());
    }
}

//! Zip container format.
//!
//! Zip is the seekable workhorse: the central directory at the object's
//! tail maps every member to a local-header offset, so one ranged read of
//! the tail plus one ranged read per entry serves any file without
//! touching the rest of the archive. Whole-archive decode goes through the
//! `zip` crate; the ranged paths parse the on-disk records directly
//! because the crate only operates on a complete, seekable file.

use super::{ArchiveFormat, SeekableArchiveFormat};
use crate::archive::{
    crc32_hex, Archive, ArchiveEntry, ArchiveIndex, ArchiveMetadata, ByteRange, CompressionKind,
    EntryKind, SeekableArchiveMetadata,
};
use crate::error::{MegError, Result};
use bytes::Bytes;
use std::io::{Cursor, Read};

const SIG_EOCD: &[u8; 4] = b"PK\x05\x06";
const SIG_EOCD64: &[u8; 4] = b"PK\x06\x06";
const SIG_EOCD64_LOCATOR: &[u8; 4] = b"PK\x06\x07";
const SIG_CDFH: &[u8; 4] = b"PK\x01\x02";
const SIG_LFH: &[u8; 4] = b"PK\x03\x04";

const EOCD_LEN: usize = 22;
const EOCD64_LOCATOR_LEN: usize = 20;
const CDFH_LEN: usize = 46;
const LFH_LEN: usize = 30;

/// How much of the tail to request when hunting for the central directory:
/// the maximal EOCD comment plus room for the directory itself on typical
/// archives.
const INDEX_TAIL_LEN: u64 = 64 * 1024;

pub struct ZipFormat;

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

fn method_kind(method: u16) -> CompressionKind {
    match method {
        0 => CompressionKind::None,
        8 => CompressionKind::Deflate,
        12 => CompressionKind::Bzip2,
        14 => CompressionKind::Lzma,
        93 => CompressionKind::Zstd,
        95 => CompressionKind::Xz,
        other => CompressionKind::Other(format!("zip-method-{other}")),
    }
}

/// Scan backwards for the end-of-central-directory record, skipping false
/// positives whose comment length disagrees with the window.
fn rfind_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < EOCD_LEN {
        return None;
    }
    let mut pos = tail.len() - EOCD_LEN;
    loop {
        if &tail[pos..pos + 4] == SIG_EOCD {
            let comment_len = le_u16(&tail[pos + 20..pos + 22]) as usize;
            if pos + EOCD_LEN + comment_len <= tail.len() {
                return Some(pos);
            }
        }
        if pos == 0 {
            return None;
        }
        pos -= 1;
    }
}

struct CentralRecord {
    path: String,
    method: u16,
    crc: u32,
    uncompressed_size: u64,
    local_header_offset: u64,
}

/// Pull 64-bit sizes/offsets out of a zip64 extended-information extra
/// field for any 32-bit field that saturated.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed: &mut u64,
    compressed: &mut u64,
    offset: &mut u64,
) -> Result<()> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = le_u16(&extra[pos..]);
        let len = le_u16(&extra[pos + 2..]) as usize;
        let body = extra
            .get(pos + 4..pos + 4 + len)
            .ok_or_else(|| MegError::decode("truncated zip extra field"))?;
        if id == 0x0001 {
            let mut at = 0;
            for field in [&mut *uncompressed, &mut *compressed, &mut *offset] {
                if *field == u32::MAX as u64 {
                    if at + 8 > body.len() {
                        return Err(MegError::decode("truncated zip64 extra field"));
                    }
                    *field = le_u64(&body[at..]);
                    at += 8;
                }
            }
        }
        pos += 4 + len;
    }
    Ok(())
}

impl ArchiveFormat for ZipFormat {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn content_types(&self) -> &'static [&'static str] {
        &["application/zip", "application/x-zip-compressed"]
    }

    fn magic(&self) -> Option<&'static [u8]> {
        Some(SIG_LFH)
    }

    fn decode(&self, name: &str, bytes: &[u8]) -> Result<Archive> {
        let mut reader = ::zip::ZipArchive::new(Cursor::new(bytes)).map_err(MegError::decode)?;
        let mut archive = Archive::new(name, self.name());

        if !reader.comment().is_empty() {
            archive.set_comment(String::from_utf8_lossy(reader.comment()).into_owned());
        }

        for i in 0..reader.len() {
            let mut file = reader.by_index(i).map_err(MegError::decode)?;
            let path = file.name().to_string();
            let mode = file.unix_mode();
            let is_symlink = mode.is_some_and(|m| m & 0o170000 == 0o120000);

            let compression = match file.compression() {
                ::zip::CompressionMethod::Stored => CompressionKind::None,
                ::zip::CompressionMethod::Deflated => CompressionKind::Deflate,
                other => CompressionKind::Other(format!("zip-{other:?}")),
            };
            let metadata = ArchiveMetadata {
                compression,
                uncompressed_size: Some(file.size()),
                crc: Some(crc32_hex(file.crc32())),
            };

            let entry = if file.is_dir() {
                ArchiveEntry {
                    metadata,
                    mode,
                    ..ArchiveEntry::directory(path)
                }
            } else if is_symlink {
                let mut target = Vec::new();
                file.read_to_end(&mut target).map_err(MegError::decode)?;
                let target = String::from_utf8_lossy(&target).into_owned();
                ArchiveEntry {
                    metadata,
                    mode,
                    ..ArchiveEntry::symlink(path, target)
                }
            } else {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data).map_err(MegError::decode)?;
                ArchiveEntry {
                    metadata,
                    mode,
                    ..ArchiveEntry::file(path, Bytes::from(data))
                }
            };
            archive.upsert(entry);
        }

        Ok(archive)
    }

    fn seekable(&self) -> Option<&dyn SeekableArchiveFormat> {
        Some(self)
    }
}

impl SeekableArchiveFormat for ZipFormat {
    fn index_hint_ranges(&self, total_len: u64) -> Vec<ByteRange> {
        let tail = ByteRange::suffix(total_len, INDEX_TAIL_LEN);
        if tail.start == 0 {
            vec![tail]
        } else {
            // Fallback covers archives whose directory outgrows the tail
            // window (thousands of members or a giant comment).
            vec![tail, ByteRange::new(0, total_len - 1)]
        }
    }

    fn decode_index(&self, tail: &[u8], total_len: u64) -> Result<ArchiveIndex> {
        let base = total_len - tail.len() as u64;
        let eocd_pos =
            rfind_eocd(tail).ok_or_else(|| MegError::decode("no end-of-central-directory record"))?;
        let eocd = &tail[eocd_pos..];

        let mut entry_count = le_u16(&eocd[10..12]) as u64;
        let mut cd_size = le_u32(&eocd[12..16]) as u64;
        let mut cd_offset = le_u32(&eocd[16..20]) as u64;
        let comment_len = le_u16(&eocd[20..22]) as usize;

        // Saturated 32-bit fields send us through the zip64 locator.
        if entry_count == u16::MAX as u64
            || cd_size == u32::MAX as u64
            || cd_offset == u32::MAX as u64
        {
            let loc_pos = eocd_pos
                .checked_sub(EOCD64_LOCATOR_LEN)
                .ok_or_else(|| MegError::decode("zip64 locator out of window"))?;
            if &tail[loc_pos..loc_pos + 4] != SIG_EOCD64_LOCATOR {
                return Err(MegError::decode("missing zip64 locator"));
            }
            let eocd64_abs = le_u64(&tail[loc_pos + 8..loc_pos + 16]);
            if eocd64_abs < base {
                return Err(MegError::decode(
                    "zip64 end-of-central-directory outside index window",
                ));
            }
            let p = (eocd64_abs - base) as usize;
            if p + 56 > tail.len() || &tail[p..p + 4] != SIG_EOCD64 {
                return Err(MegError::decode("bad zip64 end-of-central-directory"));
            }
            entry_count = le_u64(&tail[p + 32..p + 40]);
            cd_size = le_u64(&tail[p + 40..p + 48]);
            cd_offset = le_u64(&tail[p + 48..p + 56]);
        }

        if cd_offset < base {
            return Err(MegError::decode(
                "central directory starts before the index window",
            ));
        }

        let mut pos = (cd_offset - base) as usize;
        let cd_end = pos
            .checked_add(cd_size as usize)
            .filter(|&e| e <= tail.len())
            .ok_or_else(|| MegError::decode("central directory overruns index window"))?;

        let mut records = Vec::with_capacity(entry_count as usize);
        while pos + CDFH_LEN <= cd_end && records.len() < entry_count as usize {
            if &tail[pos..pos + 4] != SIG_CDFH {
                return Err(MegError::decode("bad central directory record"));
            }
            let method = le_u16(&tail[pos + 10..]);
            let crc = le_u32(&tail[pos + 16..]);
            let mut compressed = le_u32(&tail[pos + 20..]) as u64;
            let mut uncompressed = le_u32(&tail[pos + 24..]) as u64;
            let name_len = le_u16(&tail[pos + 28..]) as usize;
            let extra_len = le_u16(&tail[pos + 30..]) as usize;
            let comment_len = le_u16(&tail[pos + 32..]) as usize;
            let mut local_header_offset = le_u32(&tail[pos + 42..]) as u64;

            let name_end = pos + CDFH_LEN + name_len;
            let extra_end = name_end + extra_len;
            if extra_end + comment_len > cd_end {
                return Err(MegError::decode("truncated central directory record"));
            }
            let path = String::from_utf8_lossy(&tail[pos + CDFH_LEN..name_end]).into_owned();
            apply_zip64_extra(
                &tail[name_end..extra_end],
                &mut uncompressed,
                &mut compressed,
                &mut local_header_offset,
            )?;

            records.push(CentralRecord {
                path,
                method,
                crc,
                uncompressed_size: uncompressed,
                local_header_offset,
            });
            pos = extra_end + comment_len;
        }

        if records.len() != entry_count as usize {
            return Err(MegError::decode(format!(
                "central directory lists {} entries, found {}",
                entry_count,
                records.len()
            )));
        }

        // The directory stores where each local header begins, not how far
        // the entry's bytes run; local extra fields and data descriptors
        // can differ from the central copy. Each entry's range therefore
        // extends to the next local header (or to the directory itself),
        // and decode_entry re-parses the local header inside that window.
        let mut boundaries: Vec<u64> = records.iter().map(|r| r.local_header_offset).collect();
        boundaries.push(cd_offset);
        boundaries.sort_unstable();

        let mut index = ArchiveIndex::new();
        for record in records {
            let end = boundaries
                .iter()
                .find(|&&b| b > record.local_header_offset)
                .copied()
                .unwrap_or(cd_offset);
            index.insert(
                record.path,
                SeekableArchiveMetadata {
                    compression: method_kind(record.method),
                    uncompressed_size: Some(record.uncompressed_size),
                    crc: Some(crc32_hex(record.crc)),
                    offset: record.local_header_offset,
                    length: end - record.local_header_offset,
                },
            );
        }

        if comment_len > 0 {
            let start = eocd_pos + EOCD_LEN;
            index.set_comment(
                String::from_utf8_lossy(&tail[start..start + comment_len]).into_owned(),
            );
        }

        Ok(index)
    }

    fn decode_entry(&self, bytes: &[u8], meta: &SeekableArchiveMetadata) -> Result<ArchiveEntry> {
        if bytes.len() < LFH_LEN || &bytes[..4] != SIG_LFH {
            return Err(MegError::decode("entry range does not start at a local header"));
        }
        let name_len = le_u16(&bytes[26..]) as usize;
        let extra_len = le_u16(&bytes[28..]) as usize;
        let data_start = LFH_LEN + name_len + extra_len;
        if data_start > bytes.len() {
            return Err(MegError::decode("truncated local header"));
        }

        let path = String::from_utf8_lossy(&bytes[LFH_LEN..LFH_LEN + name_len]).into_owned();
        let body = &bytes[data_start..];

        if path.ends_with('/') {
            return Ok(ArchiveEntry {
                metadata: meta.to_metadata(),
                ..ArchiveEntry::directory(path)
            });
        }

        let data = match &meta.compression {
            CompressionKind::None => {
                // Stored entries may be followed by a data descriptor; the
                // declared size bounds the copy.
                let take = meta
                    .uncompressed_size
                    .map(|n| n as usize)
                    .unwrap_or(body.len())
                    .min(body.len());
                body[..take].to_vec()
            }
            CompressionKind::Deflate => {
                let mut out = Vec::new();
                flate2::read::DeflateDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(MegError::decode)?;
                out
            }
            other => {
                return Err(MegError::decode(format!(
                    "unsupported zip entry compression {:?} for ranged decode",
                    other.as_str()
                )))
            }
        };

        let size = data.len() as u64;
        Ok(ArchiveEntry {
            size,
            metadata: meta.to_metadata(),
            ..ArchiveEntry::file(path, Bytes::from(data))
        })
    }
}

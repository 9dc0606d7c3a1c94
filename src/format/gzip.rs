//! Compression layers: gzip and bzip2.

use super::CompressionFormat;
use crate::archive::CompressionKind;
use crate::error::{MegError, Result};
use std::io::Read;

pub struct GzipFormat;

impl CompressionFormat for GzipFormat {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gz"]
    }

    fn content_types(&self) -> &'static [&'static str] {
        &["application/gzip", "application/x-gzip"]
    }

    fn magic(&self) -> Option<&'static [u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(MegError::decode)?;
        Ok(out)
    }
}

pub struct Bzip2Format;

impl CompressionFormat for Bzip2Format {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Bzip2
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["bz2"]
    }

    fn content_types(&self) -> &'static [&'static str] {
        &["application/x-bzip2"]
    }

    fn magic(&self) -> Option<&'static [u8]> {
        Some(b"BZh")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        bzip2::read::BzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(MegError::decode)?;
        Ok(out)
    }
}

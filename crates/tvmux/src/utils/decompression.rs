//! Magic-byte detection and decompression for M3U/XMLTV payloads.
//!
//! Providers frequently serve `.m3u.gz` or `.xml.xz` regardless of the
//! Content-Encoding header, so the format is sniffed from the leading bytes
//! of the payload itself.

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-bzip2",
    feature = "compression-xz"
))]
use std::io::Read;

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-bzip2",
    feature = "compression-xz"
))]
use anyhow::Context;
use anyhow::Result;
use bytes::Bytes;

#[cfg(feature = "compression-gzip")]
use flate2::read::GzDecoder;

#[cfg(feature = "compression-bzip2")]
use bzip2::read::BzDecoder;

#[cfg(feature = "compression-xz")]
use xz2::read::XzDecoder;

/// Supported compression formats for playlist and guide content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-bzip2")]
    Bzip2,
    #[cfg(feature = "compression-xz")]
    Xz,
    Uncompressed,
}

/// Magic-byte detection and decompression utility.
pub struct DecompressionService;

impl DecompressionService {
    /// Detect the compression format from leading magic bytes.
    pub fn detect_compression_format(data: &[u8]) -> CompressionFormat {
        if let Some(kind) = infer::get(data) {
            match kind.mime_type() {
                #[cfg(feature = "compression-gzip")]
                "application/gzip" => CompressionFormat::Gzip,
                #[cfg(feature = "compression-bzip2")]
                "application/x-bzip2" => CompressionFormat::Bzip2,
                #[cfg(feature = "compression-xz")]
                "application/x-xz" => CompressionFormat::Xz,
                _ => CompressionFormat::Uncompressed,
            }
        } else {
            CompressionFormat::Uncompressed
        }
    }

    /// Decompress data based on the detected format. Uncompressed data passes
    /// through unchanged.
    pub fn decompress(data: Bytes) -> Result<Vec<u8>> {
        let format = Self::detect_compression_format(&data);

        match format {
            #[cfg(feature = "compression-gzip")]
            CompressionFormat::Gzip => Self::decompress_gzip(data),
            #[cfg(feature = "compression-bzip2")]
            CompressionFormat::Bzip2 => Self::decompress_bzip2(data),
            #[cfg(feature = "compression-xz")]
            CompressionFormat::Xz => Self::decompress_xz(data),
            CompressionFormat::Uncompressed => Ok(data.to_vec()),
        }
    }

    #[cfg(feature = "compression-gzip")]
    fn decompress_gzip(data: Bytes) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data.as_ref());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress gzip data")?;
        Ok(decompressed)
    }

    #[cfg(feature = "compression-bzip2")]
    fn decompress_bzip2(data: Bytes) -> Result<Vec<u8>> {
        let mut decoder = BzDecoder::new(data.as_ref());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress bzip2 data")?;
        Ok(decompressed)
    }

    #[cfg(feature = "compression-xz")]
    fn decompress_xz(data: Bytes) -> Result<Vec<u8>> {
        let mut decoder = XzDecoder::new(data.as_ref());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress xz data")?;
        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "compression-gzip")]
    use std::io::Write;

    #[cfg(feature = "compression-gzip")]
    use flate2::{write::GzEncoder, Compression};

    #[test]
    fn detects_uncompressed() {
        let data = b"#EXTM3U\n";
        assert_eq!(
            DecompressionService::detect_compression_format(data),
            CompressionFormat::Uncompressed
        );
    }

    #[test]
    #[cfg(feature = "compression-gzip")]
    fn detects_and_decompresses_gzip() {
        let original = b"<tv></tv>";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(
            DecompressionService::detect_compression_format(&compressed),
            CompressionFormat::Gzip
        );
        let decompressed = DecompressionService::decompress(Bytes::from(compressed)).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn passes_through_uncompressed() {
        let data = b"#EXTM3U\n";
        let result = DecompressionService::decompress(Bytes::from(data.as_ref())).unwrap();
        assert_eq!(result, data);
    }
}

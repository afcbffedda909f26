//! Archive blob codec: compress, hash, and deterministically key a raw
//! NDJSON buffer for object storage.
//!
//! The key embeds the content hash, so re-preparing the same window with the
//! same bytes yields the same key and duplicate uploads stay idempotent.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::worm::sha256_hex;

/// Metadata describing a prepared archive blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Deterministic object key, see [`prepare_blob`].
    pub key: String,
    /// SHA-256 hex digest of the compressed bytes.
    pub sha256: String,
    /// Compressed size in bytes.
    pub size: i64,
    /// Number of newline-terminated lines in the raw input.
    pub lines: i64,
}

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("gzip write: {0}")]
    Compress(#[source] std::io::Error),

    #[error("gzip read: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Timestamp layout used inside object keys, e.g. `20240131T235959Z`.
const KEY_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Compress, hash, and key raw log data for archival.
///
/// The returned key has the stable layout
/// `<log_type>/<customer>/<zone>/YYYY/MM/DD/<from>_<to>_<sha8>.ndjson.gz`
/// where the date path and both timestamps are UTC and `sha8` is the first
/// 8 hex chars of the compressed blob's SHA-256.
pub fn prepare_blob(
    raw: &[u8],
    customer_id: Uuid,
    zone_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    log_type: &str,
) -> Result<(Vec<u8>, BlobMetadata), CodecError> {
    let lines = count_lines(raw);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).map_err(CodecError::Compress)?;
    let compressed = encoder.finish().map_err(CodecError::Compress)?;

    let sha256 = sha256_hex(&compressed);

    let key = format!(
        "{log_type}/{customer_id}/{zone_id}/{}/{}_{}_{}.ndjson.gz",
        from.format("%Y/%m/%d"),
        from.format(KEY_TIME_FORMAT),
        to.format(KEY_TIME_FORMAT),
        &sha256[..8],
    );

    let meta = BlobMetadata {
        key,
        size: compressed.len() as i64,
        lines,
        sha256,
    };
    Ok((compressed, meta))
}

/// Read gzip-compressed data back to its original bytes.
pub fn decompress<R: Read>(reader: R) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(reader);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

fn count_lines(buf: &[u8]) -> i64 {
    buf.iter().filter(|&&b| b == b'\n').count() as i64
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 22, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap();
        (from, to)
    }

    #[test]
    fn round_trip_restores_original_bytes() {
        let raw = b"{\"a\":1}\n{\"b\":2}\n";
        let (from, to) = window();

        let (compressed, _) =
            prepare_blob(raw, Uuid::new_v4(), Uuid::new_v4(), from, to, "logs").unwrap();

        assert_eq!(decompress(&compressed[..]).unwrap(), raw);
    }

    #[test]
    fn key_is_deterministic_for_same_window_and_content() {
        let raw = b"{\"a\":1}\n";
        let customer = Uuid::new_v4();
        let zone = Uuid::new_v4();
        let (from, to) = window();

        let (_, m1) = prepare_blob(raw, customer, zone, from, to, "logs").unwrap();
        let (_, m2) = prepare_blob(raw, customer, zone, from, to, "logs").unwrap();

        assert_eq!(m1, m2);
    }

    #[test]
    fn key_layout_matches_stable_format() {
        let raw = b"{\"a\":1}\n";
        let customer = Uuid::nil();
        let zone = Uuid::nil();
        let (from, to) = window();

        let (compressed, meta) =
            prepare_blob(raw, customer, zone, from, to, "security").unwrap();
        let sha = sha256_hex(&compressed);

        assert_eq!(
            meta.key,
            format!(
                "security/{customer}/{zone}/2024/01/31/\
                 20240131T220000Z_20240131T230000Z_{}.ndjson.gz",
                &sha[..8]
            )
        );
        assert_eq!(meta.sha256, sha);
        assert_eq!(meta.size, compressed.len() as i64);
    }

    #[test]
    fn counts_newline_terminated_lines_only() {
        let raw = b"one\ntwo\nunterminated";
        let (from, to) = window();

        let (_, meta) =
            prepare_blob(raw, Uuid::new_v4(), Uuid::new_v4(), from, to, "logs").unwrap();

        assert_eq!(meta.lines, 2);
    }

    #[test]
    fn empty_input_compresses_to_zero_lines() {
        let (from, to) = window();
        let (compressed, meta) =
            prepare_blob(b"", Uuid::new_v4(), Uuid::new_v4(), from, to, "logs").unwrap();

        assert_eq!(meta.lines, 0);
        assert_eq!(decompress(&compressed[..]).unwrap(), b"");
    }
}

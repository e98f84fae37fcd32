//! Self-describing header region of persisted container files.
//!
//! Layout of the reserved region at byte offset 0:
//!
//! ```text
//! [identifier: 8][header_size: u32 BE][record_len: u32 BE][record JSON][\n][zero padding]
//! ```
//!
//! The data region starts at `header_size`. The reservation is sized from the record contents
//! (never hard-coded) so the record can be rewritten in place once the data region exists.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

pub const IDENTIFIER: &[u8; 8] = b"SYLPHDAT";
pub const CURRENT_VERSION: u32 = 1;
/// Smallest reservation for the header region; sizes are rounded up to multiples of this.
pub const MIN_HEADER_SIZE: usize = 512;

const PREFIX_LEN: usize = 8 /* identifier */
    + 4 /* header_size */
    + 4 /* record_len */;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("unrecognized container: identifier mismatch")]
    UnrecognizedContainer,
    #[error("container header is truncated")]
    Truncated,
    #[error("malformed header region: {0}")]
    MalformedRegion(&'static str),
    #[error("invalid header record: {0}")]
    InvalidRecord(#[from] serde_json::Error),
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u32),
    #[error("header record needs {needed} bytes but the reserved region holds {reserved}")]
    RegionTooSmall { needed: usize, reserved: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Type")]
    pub data_type: String,
    #[serde(rename = "TypeAlias")]
    pub type_alias: String,
}

impl Header {
    /// Header for the current format version.
    pub fn new(data_type: impl Into<String>, type_alias: impl Into<String>) -> Self {
        Self {
            version: CURRENT_VERSION,
            data_type: data_type.into(),
            type_alias: type_alias.into(),
        }
    }
}

/// A parsed header plus the size of the region it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRegion {
    pub header: Header,
    pub size: usize,
}

fn record_bytes(header: &Header) -> Result<Vec<u8>, HeaderError> {
    Ok(serde_json::to_vec(header)?)
}

/// Size of the header region reserved for a container of the given type.
///
/// The estimate uses the widest possible version number so any later version rewrite fits.
pub fn header_size(data_type: &str, type_alias: &str) -> usize {
    let widest = Header {
        version: u32::MAX,
        data_type: data_type.to_string(),
        type_alias: type_alias.to_string(),
    };
    // Serializing a struct of strings and an integer cannot fail; fall back to a generous
    // bound anyway so the result is always safe.
    let record_len = serde_json::to_vec(&widest)
        .map(|bytes| bytes.len())
        .unwrap_or_else(|_| 64 + 6 * (data_type.len() + type_alias.len()));
    let needed = PREFIX_LEN + record_len + 1;
    needed.div_ceil(MIN_HEADER_SIZE).max(1) * MIN_HEADER_SIZE
}

/// Encode a full header region for `header`, sized by [`header_size`].
pub fn encode_region(header: &Header) -> Result<Vec<u8>, HeaderError> {
    encode_region_with_size(header, header_size(&header.data_type, &header.type_alias))
}

/// Encode `header` into a region of exactly `reserved` bytes.
pub fn encode_region_with_size(header: &Header, reserved: usize) -> Result<Vec<u8>, HeaderError> {
    let record = record_bytes(header)?;
    let needed = PREFIX_LEN + record.len() + 1;
    if needed > reserved {
        return Err(HeaderError::RegionTooSmall { needed, reserved });
    }
    let reserved_u32 = u32::try_from(reserved).map_err(|_| HeaderError::MalformedRegion("region too large"))?;
    let record_len = u32::try_from(record.len()).map_err(|_| HeaderError::MalformedRegion("record too large"))?;

    let mut out = Vec::with_capacity(reserved);
    out.extend_from_slice(IDENTIFIER);
    out.extend_from_slice(&reserved_u32.to_be_bytes());
    out.extend_from_slice(&record_len.to_be_bytes());
    out.extend_from_slice(&record);
    out.push(b'\n');
    out.resize(reserved, 0);
    Ok(out)
}

/// Read and validate a header region from the start of `reader`.
///
/// Only the prefix and the record are consumed; trailing padding is left unread.
pub fn read_header_region(reader: &mut impl Read) -> Result<HeaderRegion, HeaderError> {
    let mut prefix = Vec::with_capacity(PREFIX_LEN);
    reader.by_ref().take(PREFIX_LEN as u64).read_to_end(&mut prefix)?;
    if prefix.len() < IDENTIFIER.len() || &prefix[..IDENTIFIER.len()] != IDENTIFIER {
        return Err(HeaderError::UnrecognizedContainer);
    }
    if prefix.len() < PREFIX_LEN {
        return Err(HeaderError::Truncated);
    }

    let mut size_bytes = [0u8; 4];
    size_bytes.copy_from_slice(&prefix[8..12]);
    let size = u32::from_be_bytes(size_bytes) as usize;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&prefix[12..16]);
    let record_len = u32::from_be_bytes(len_bytes) as usize;

    if PREFIX_LEN + record_len + 1 > size {
        return Err(HeaderError::MalformedRegion("record exceeds reserved region"));
    }

    let mut record = vec![0u8; record_len + 1];
    reader.read_exact(&mut record).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => HeaderError::Truncated,
        _ => HeaderError::Io(err),
    })?;
    if record.pop() != Some(b'\n') {
        return Err(HeaderError::MalformedRegion("record is not newline-terminated"));
    }

    let header: Header = serde_json::from_slice(&record)?;
    if header.version == 0 || header.version > CURRENT_VERSION {
        return Err(HeaderError::UnsupportedVersion(header.version));
    }
    Ok(HeaderRegion { header, size })
}

/// Read the header record of the container file at `path`.
pub fn read_header(path: impl AsRef<Path>) -> Result<Header, HeaderError> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    Ok(read_header_region(&mut reader)?.header)
}

/// Write `header` into the container file at `path`.
///
/// A missing or empty file gets a fresh region with an empty data region. An existing container
/// has its reserved region overwritten in place; the data region is never touched.
pub fn write_header(path: impl AsRef<Path>, header: &Header) -> Result<(), HeaderError> {
    let path = path.as_ref();
    let existing_len = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };

    if existing_len == 0 {
        let region = encode_region(header)?;
        sylph_fs::persist_regions(path, &[&region])?;
        return Ok(());
    }

    let reserved = {
        let mut reader = BufReader::new(File::open(path)?);
        read_header_region(&mut reader)?.size
    };
    let region = encode_region_with_size(header, reserved)?;
    sylph_fs::overwrite_at(path, 0, &region)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn region_round_trip_tolerates_trailing_data() {
        let header = Header::new("[table]", "tables");
        let mut bytes = encode_region(&header).expect("encode");
        assert_eq!(bytes.len(), MIN_HEADER_SIZE);
        bytes.extend_from_slice(b"data region follows");

        let region = read_header_region(&mut Cursor::new(&bytes)).expect("decode");
        assert_eq!(region.header, header);
        assert_eq!(region.size, MIN_HEADER_SIZE);
    }

    #[test]
    fn identifier_mismatch_is_unrecognized() {
        let err = read_header_region(&mut Cursor::new(b"SQLite format 3\0")).expect_err("foreign file");
        assert!(matches!(err, HeaderError::UnrecognizedContainer), "{err:?}");

        let err = read_header_region(&mut Cursor::new(b"SY")).expect_err("short file");
        assert!(matches!(err, HeaderError::UnrecognizedContainer), "{err:?}");
    }

    #[test]
    fn newer_versions_are_rejected() {
        let header = Header {
            version: CURRENT_VERSION + 1,
            data_type: "table".into(),
            type_alias: "table".into(),
        };
        let bytes = encode_region(&header).expect("encode");
        let err = read_header_region(&mut Cursor::new(&bytes)).expect_err("future version");
        assert!(matches!(err, HeaderError::UnsupportedVersion(v) if v == CURRENT_VERSION + 1));
    }

    #[test]
    fn corrupt_record_is_reported() {
        let mut bytes = encode_region(&Header::new("table", "table")).expect("encode");
        bytes[PREFIX_LEN] = b'#';
        let err = read_header_region(&mut Cursor::new(&bytes)).expect_err("corrupt json");
        assert!(matches!(err, HeaderError::InvalidRecord(_)), "{err:?}");
    }

    #[test]
    fn record_that_outgrows_reservation_is_refused() {
        let header = Header::new("t".repeat(600), "alias");
        let err = encode_region_with_size(&header, MIN_HEADER_SIZE).expect_err("too small");
        assert!(matches!(err, HeaderError::RegionTooSmall { reserved: MIN_HEADER_SIZE, .. }));
    }

    proptest! {
        #[test]
        fn header_size_always_fits_record(data_type in ".{0,300}", type_alias in ".{0,300}") {
            let size = header_size(&data_type, &type_alias);
            let record = serde_json::to_vec(&Header::new(data_type.clone(), type_alias.clone())).unwrap();
            prop_assert!(size >= MIN_HEADER_SIZE);
            prop_assert!(size >= PREFIX_LEN + record.len() + 1);
            prop_assert_eq!(size % MIN_HEADER_SIZE, 0);
        }
    }
}

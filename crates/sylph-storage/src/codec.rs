//! Value codec shared by persisted datasets and the spill cache backing store.
//!
//! Fixed-width columns are stored little-endian as-is. Payloads larger than
//! [`COMPRESSION_THRESHOLD`] are byte-shuffled by element width and zlib-compressed. Text and
//! byte-string columns are stored as length-prefixed elements; the text encoding and the logical
//! dtype travel alongside the payload so decoding reconstructs the exact column type
//! (timestamps and durations are stored as i64 whole seconds plus 32-bit nanoseconds, so every
//! chrono value survives a round trip).

use crate::column::{Column, DType, TEMPORAL_WIDTH};
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub const COMPRESSION_THRESHOLD: usize = 4096;
pub const TEXT_ENCODING: &str = "utf-8";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown dtype: {0}")]
    UnknownDType(String),
    #[error("unknown payload encoding: {0}")]
    UnknownEncoding(String),
    #[error("unsupported text encoding: {0}")]
    UnsupportedTextEncoding(String),
    #[error("corrupt payload: {0}")]
    Corrupt(&'static str),
    #[error("temporal value out of range: {0}")]
    TemporalOutOfRange(i64),
    #[error("invalid utf-8 text: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    ShuffleZlib,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::ShuffleZlib => "shuffle+zlib",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CodecError> {
        match value {
            "raw" => Ok(Encoding::Raw),
            "shuffle+zlib" => Ok(Encoding::ShuffleZlib),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

/// A column in its stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedColumn {
    pub dtype: DType,
    pub encoding: Encoding,
    /// Set for text columns only.
    pub text_encoding: Option<String>,
    pub len: usize,
    pub payload: Vec<u8>,
}

pub fn encode(column: &Column) -> Result<EncodedColumn, CodecError> {
    let dtype = column.dtype();
    let raw = raw_bytes(column)?;
    let (encoding, payload) = if raw.len() > COMPRESSION_THRESHOLD {
        let shuffled = shuffle(&raw, dtype.fixed_width().unwrap_or(1));
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
        encoder.write_all(&shuffled)?;
        (Encoding::ShuffleZlib, encoder.finish()?)
    } else {
        (Encoding::Raw, raw)
    };

    Ok(EncodedColumn {
        dtype,
        encoding,
        text_encoding: (dtype == DType::Text).then(|| TEXT_ENCODING.to_string()),
        len: column.len(),
        payload,
    })
}

pub fn decode(encoded: &EncodedColumn) -> Result<Column, CodecError> {
    if let Some(text_encoding) = &encoded.text_encoding {
        if !text_encoding.eq_ignore_ascii_case(TEXT_ENCODING) {
            return Err(CodecError::UnsupportedTextEncoding(text_encoding.clone()));
        }
    }

    let raw = match encoded.encoding {
        Encoding::Raw => std::borrow::Cow::Borrowed(encoded.payload.as_slice()),
        Encoding::ShuffleZlib => {
            let mut shuffled = Vec::new();
            ZlibDecoder::new(encoded.payload.as_slice()).read_to_end(&mut shuffled)?;
            std::borrow::Cow::Owned(unshuffle(&shuffled, encoded.dtype.fixed_width().unwrap_or(1)))
        }
    };
    column_from_raw(encoded.dtype, encoded.len, &raw)
}

fn raw_bytes(column: &Column) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(column.byte_size());
    match column {
        Column::Bool(values) => out.extend(values.iter().map(|v| u8::from(*v))),
        Column::Int64(values) => {
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Column::Float64(values) => {
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Column::Text(values) => {
            for v in values {
                push_prefixed(&mut out, v.as_bytes())?;
            }
        }
        Column::Bytes(values) => {
            for v in values {
                push_prefixed(&mut out, v)?;
            }
        }
        Column::DateTime(values) => {
            for v in values {
                let utc = v.and_utc();
                out.extend_from_slice(&utc.timestamp().to_le_bytes());
                out.extend_from_slice(&utc.timestamp_subsec_nanos().to_le_bytes());
            }
        }
        Column::TimeDelta(values) => {
            for v in values {
                // `subsec_nanos` carries the sign of the duration.
                out.extend_from_slice(&v.num_seconds().to_le_bytes());
                out.extend_from_slice(&v.subsec_nanos().to_le_bytes());
            }
        }
    }
    Ok(out)
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::Corrupt("element larger than 4 GiB"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn fixed_chunks(raw: &[u8], len: usize, width: usize) -> Result<std::slice::ChunksExact<'_, u8>, CodecError> {
    if raw.len() != len.saturating_mul(width) {
        return Err(CodecError::Corrupt("payload length does not match element count"));
    }
    Ok(raw.chunks_exact(width))
}

fn le_i64(chunk: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&chunk[..8]);
    i64::from_le_bytes(bytes)
}

fn le_u32(chunk: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&chunk[..4]);
    u32::from_le_bytes(bytes)
}

/// Split a temporal element into whole seconds and the 32-bit nanosecond field.
fn seconds_and_nanos(chunk: &[u8]) -> (i64, u32) {
    (le_i64(&chunk[..8]), le_u32(&chunk[8..]))
}

fn datetime_from_parts(secs: i64, nanos: u32) -> Result<NaiveDateTime, CodecError> {
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or(CodecError::TemporalOutOfRange(secs))
}

fn timedelta_from_parts(secs: i64, nanos: u32) -> Result<TimeDelta, CodecError> {
    let nanos = nanos as i32;
    if nanos.unsigned_abs() >= 1_000_000_000 {
        return Err(CodecError::Corrupt("duration nanoseconds out of range"));
    }
    TimeDelta::try_seconds(secs)
        .and_then(|whole| whole.checked_add(&TimeDelta::nanoseconds(i64::from(nanos))))
        .ok_or(CodecError::TemporalOutOfRange(secs))
}

fn prefixed_elements(raw: &[u8], len: usize) -> Result<Vec<&[u8]>, CodecError> {
    let mut out = Vec::with_capacity(len);
    let mut rest = raw;
    for _ in 0..len {
        if rest.len() < 4 {
            return Err(CodecError::Corrupt("truncated element length"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&rest[..4]);
        let n = u32::from_le_bytes(len_bytes) as usize;
        rest = &rest[4..];
        if rest.len() < n {
            return Err(CodecError::Corrupt("truncated element"));
        }
        out.push(&rest[..n]);
        rest = &rest[n..];
    }
    if !rest.is_empty() {
        return Err(CodecError::Corrupt("trailing bytes after last element"));
    }
    Ok(out)
}

fn column_from_raw(dtype: DType, len: usize, raw: &[u8]) -> Result<Column, CodecError> {
    Ok(match dtype {
        DType::Bool => Column::Bool(fixed_chunks(raw, len, 1)?.map(|c| c[0] != 0).collect()),
        DType::Int64 => Column::Int64(fixed_chunks(raw, len, 8)?.map(le_i64).collect()),
        DType::Float64 => Column::Float64(
            fixed_chunks(raw, len, 8)?
                .map(|c| f64::from_bits(le_i64(c) as u64))
                .collect(),
        ),
        DType::Text => Column::Text(
            prefixed_elements(raw, len)?
                .into_iter()
                .map(|b| String::from_utf8(b.to_vec()))
                .collect::<Result<_, _>>()?,
        ),
        DType::Bytes => Column::Bytes(
            prefixed_elements(raw, len)?
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect(),
        ),
        DType::DateTime => Column::DateTime(
            fixed_chunks(raw, len, TEMPORAL_WIDTH)?
                .map(|c| {
                    let (secs, nanos) = seconds_and_nanos(c);
                    datetime_from_parts(secs, nanos)
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        DType::TimeDelta => Column::TimeDelta(
            fixed_chunks(raw, len, TEMPORAL_WIDTH)?
                .map(|c| {
                    let (secs, nanos) = seconds_and_nanos(c);
                    timedelta_from_parts(secs, nanos)
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

/// Group byte `b` of every element together so similar bytes compress well.
fn shuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    if width <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / width;
    let body = n * width;
    let mut out = vec![0u8; bytes.len()];
    for i in 0..n {
        for b in 0..width {
            out[b * n + i] = bytes[i * width + b];
        }
    }
    out[body..].copy_from_slice(&bytes[body..]);
    out
}

fn unshuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    if width <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / width;
    let body = n * width;
    let mut out = vec![0u8; bytes.len()];
    for i in 0..n {
        for b in 0..width {
            out[i * width + b] = bytes[b * n + i];
        }
    }
    out[body..].copy_from_slice(&bytes[body..]);
    out
}

/// Cumulative codec calls.
///
/// Every path that moves column values in or out of a store goes through these counters, which
/// makes "was this a link or a copy" observable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    pub encodes: u64,
    pub decodes: u64,
    pub links: u64,
}

#[derive(Debug, Default)]
pub struct CodecCounters {
    encodes: AtomicU64,
    decodes: AtomicU64,
    links: AtomicU64,
}

impl CodecCounters {
    pub fn encode(&self, column: &Column) -> Result<EncodedColumn, CodecError> {
        self.encodes.fetch_add(1, Ordering::Relaxed);
        encode(column)
    }

    pub fn decode(&self, encoded: &EncodedColumn) -> Result<Column, CodecError> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        decode(encoded)
    }

    pub fn record_link(&self) {
        self.links.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CodecStats {
        CodecStats {
            encodes: self.encodes.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            links: self.links.load(Ordering::Relaxed),
        }
    }
}

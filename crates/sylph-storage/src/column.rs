//! In-memory column arrays.

use chrono::{NaiveDateTime, TimeDelta};
use std::fmt;

const TEXT_ELEMENT_OVERHEAD_BYTES: usize = 24;
/// Stored width of a timestamp or duration: i64 seconds plus a 32-bit nanosecond field.
pub const TEMPORAL_WIDTH: usize = 12;

/// Logical element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int64,
    Float64,
    Text,
    Bytes,
    /// Naive timestamps with nanosecond resolution.
    DateTime,
    /// Durations with nanosecond resolution.
    TimeDelta,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Text => "text",
            DType::Bytes => "bytes",
            DType::DateTime => "datetime64[ns]",
            DType::TimeDelta => "timedelta64[ns]",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "bool" => DType::Bool,
            "int64" => DType::Int64,
            "float64" => DType::Float64,
            "text" => DType::Text,
            "bytes" => DType::Bytes,
            "datetime64[ns]" => DType::DateTime,
            "timedelta64[ns]" => DType::TimeDelta,
            _ => return None,
        })
    }

    /// Element width in the stored representation, or `None` for variable-width types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DType::Bool => Some(1),
            DType::Int64 | DType::Float64 => Some(8),
            DType::DateTime | DType::TimeDelta => Some(TEMPORAL_WIDTH),
            DType::Text | DType::Bytes => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    DateTime(Vec<NaiveDateTime>),
    TimeDelta(Vec<TimeDelta>),
}

impl Column {
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Column::Bool(Vec::new()),
            DType::Int64 => Column::Int64(Vec::new()),
            DType::Float64 => Column::Float64(Vec::new()),
            DType::Text => Column::Text(Vec::new()),
            DType::Bytes => Column::Bytes(Vec::new()),
            DType::DateTime => Column::DateTime(Vec::new()),
            DType::TimeDelta => Column::TimeDelta(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Column::Bool(_) => DType::Bool,
            Column::Int64(_) => DType::Int64,
            Column::Float64(_) => DType::Float64,
            Column::Text(_) => DType::Text,
            Column::Bytes(_) => DType::Bytes,
            Column::DateTime(_) => DType::DateTime,
            Column::TimeDelta(_) => DType::TimeDelta,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Bytes(v) => v.len(),
            Column::DateTime(v) => v.len(),
            Column::TimeDelta(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident footprint used for cache accounting.
    ///
    /// Fixed-width columns count their stored element width; variable-width columns count their
    /// contents plus a per-element overhead.
    pub fn byte_size(&self) -> usize {
        match self {
            Column::Text(values) => values
                .iter()
                .map(|v| v.len().saturating_add(TEXT_ELEMENT_OVERHEAD_BYTES))
                .fold(0usize, usize::saturating_add),
            Column::Bytes(values) => values
                .iter()
                .map(|v| v.len().saturating_add(TEXT_ELEMENT_OVERHEAD_BYTES))
                .fold(0usize, usize::saturating_add),
            other => other
                .len()
                .saturating_mul(other.dtype().fixed_width().unwrap_or(1)),
        }
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Column::Bool(values)
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Column::Int64(values)
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::Float64(values)
    }
}

impl From<Vec<String>> for Column {
    fn from(values: Vec<String>) -> Self {
        Column::Text(values)
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::Text(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<NaiveDateTime>> for Column {
    fn from(values: Vec<NaiveDateTime>) -> Self {
        Column::DateTime(values)
    }
}

impl From<Vec<TimeDelta>> for Column {
    fn from(values: Vec<TimeDelta>) -> Self {
        Column::TimeDelta(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_names_round_trip() {
        for dtype in [
            DType::Bool,
            DType::Int64,
            DType::Float64,
            DType::Text,
            DType::Bytes,
            DType::DateTime,
            DType::TimeDelta,
        ] {
            assert_eq!(DType::parse(dtype.as_str()), Some(dtype));
            assert_eq!(Column::empty(dtype).dtype(), dtype);
        }
        assert_eq!(DType::parse("complex128"), None);
    }

    #[test]
    fn byte_size_counts_element_width() {
        assert_eq!(Column::from(vec![1i64, 2, 3, 4, 5]).byte_size(), 40);
        assert_eq!(Column::from(vec![true, false]).byte_size(), 2);
        assert_eq!(Column::from(vec!["ab"]).byte_size(), 2 + TEXT_ELEMENT_OVERHEAD_BYTES);
    }
}

//! Logical container types as recorded in the header `Type` field.
//!
//! `table` and `text` are leaves; `[T]` is a list of `T` and `{T}` a dict of `T`.

use crate::error::ContainerError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Table,
    Text,
    List(Box<DataType>),
    Dict(Box<DataType>),
}

impl DataType {
    pub fn list(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn dict(element: DataType) -> Self {
        DataType::Dict(Box::new(element))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Table => f.write_str("table"),
            DataType::Text => f.write_str("text"),
            DataType::List(element) => write!(f, "[{element}]"),
            DataType::Dict(element) => write!(f, "{{{element}}}"),
        }
    }
}

impl FromStr for DataType {
    type Err = ContainerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || ContainerError::InvalidDataType(value.to_string());
        match trimmed {
            "table" => Ok(DataType::Table),
            "text" => Ok(DataType::Text),
            _ => {
                if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                    return Ok(DataType::list(inner.parse().map_err(|_| invalid())?));
                }
                if let Some(inner) = trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    return Ok(DataType::dict(inner.parse().map_err(|_| invalid())?));
                }
                Err(invalid())
            }
        }
    }
}

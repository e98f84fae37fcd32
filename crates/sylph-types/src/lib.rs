//! Lazy, typed containers on top of `sylph-storage`.
//!
//! A [`File`] holds one payload ([`Table`], [`Text`], [`List`] or [`Dict`]) that is read from
//! its container file on demand. Writing one container into another links unmodified data
//! where possible instead of copying it.

mod collection;
pub mod datatype;
pub mod dict;
mod error;
pub mod file;
pub mod list;
pub mod payload;
pub mod source;
pub mod table;
pub mod text;

pub use crate::datatype::DataType;
pub use crate::dict::Dict;
pub use crate::error::{ContainerError, Result};
pub use crate::file::{File, FileList, OpenOptions, TableFile};
pub use crate::list::List;
pub use crate::payload::Payload;
pub use crate::source::{resource_fn, FnResource, Resource};
pub use crate::table::Table;
pub use crate::text::Text;

pub use sylph_storage::{with_fresh_session, Column, DType, ErrorKind, Session, SessionConfig};

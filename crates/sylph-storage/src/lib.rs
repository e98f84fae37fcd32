//! File-backed storage core for sylph containers.
//!
//! This crate owns everything below the container protocol:
//! - the self-describing binary container header (`header`)
//! - the column model and the value codec used for persisted and spilled data
//! - a hierarchical group store kept as a SQLite image behind the header region
//! - the per-session open-file registry (one physical handle per file)
//! - the spill cache that keeps hot column data resident and spills the rest
//! - session state tying the cache and registry together

pub mod cache;
pub mod codec;
pub mod column;
mod error;
pub mod file;
pub mod group;
pub mod header;
pub mod path;
mod schema;
pub mod session;
pub mod store;

pub use crate::cache::{CacheConfig, CacheError, CacheHandle, CacheMetrics, CacheStats, SpillCache};
pub use crate::codec::{CodecCounters, CodecError, CodecStats, EncodedColumn, Encoding};
pub use crate::column::{Column, DType};
pub use crate::error::{ErrorKind, Result, StorageError};
pub use crate::file::{Access, FileLease, FileRegistry, Mode, PhysicalFile};
pub use crate::group::{transferable, GroupHandle, MAX_LINK_DEPTH};
pub use crate::header::{header_size, read_header, write_header, Header, HeaderError};
pub use crate::session::{with_fresh_session, Session, SessionConfig};
pub use crate::store::{Location, Node, Store};

use crate::datatype::DataType;
use crate::error::Result;
use std::fmt;
use sylph_storage::{GroupHandle, Location, Session};

/// Data held by a container.
///
/// Payloads are cheap handles: `Clone` is a shallow copy that shares the underlying data, so a
/// change made through one clone is visible through all of them. [`Payload::deep_copy`] gives an
/// independent value.
pub trait Payload: Clone + fmt::Debug + Sized + 'static {
    /// The logical type written to the header of files holding this payload.
    fn data_type() -> DataType;

    /// A new, empty payload.
    fn empty(session: &Session) -> Self;

    /// A payload that reads lazily from `group`.
    fn from_group(session: &Session, group: GroupHandle) -> Result<Self>;

    fn session(&self) -> Session;

    /// Where the payload was loaded from, if it came from a file.
    fn origin(&self) -> Option<Location>;

    /// Write the payload into `target`, linking instead of copying wherever the data is
    /// unmodified and both sides are [`sylph_storage::transferable`].
    fn writeback_into(&self, target: &GroupHandle) -> Result<()>;

    /// Materialize everything and copy it, sharing nothing with `self`.
    fn deep_copy(&self) -> Result<Self>;
}

/// Whether `target` is the very group `source` was read from.
pub(crate) fn same_origin(source: Option<&GroupHandle>, target: &GroupHandle) -> bool {
    match (source.and_then(GroupHandle::location), target.location()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether the data at `source` may be linked into `target` instead of copied.
pub(crate) fn can_link(source: Option<&GroupHandle>, target: &GroupHandle) -> bool {
    source.is_some_and(|source| source.is_open() && sylph_storage::transferable(source, target))
}

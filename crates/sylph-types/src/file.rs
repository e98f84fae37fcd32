//! Container handles.
//!
//! A [`File`] wraps exactly one of: a payload produced by a [`Resource`], an in-memory payload,
//! or a payload backed by a physical container file. Closing is idempotent and also happens on
//! drop.

use crate::datatype::DataType;
use crate::error::{ContainerError, Result};
use crate::list::List;
use crate::payload::Payload;
use crate::source::Resource;
use crate::table::Table;
use std::fmt;
use std::path::{Path, PathBuf};
use sylph_storage::{path, Access, GroupHandle, Header, Location, Mode, Session};

pub type TableFile = File<Table>;
pub type FileList<P> = File<List<P>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    mode: Mode,
    path: String,
    type_alias: Option<String>,
    import_links: bool,
}

impl OpenOptions {
    pub fn read() -> Self {
        Self {
            mode: Mode::Read,
            path: path::ROOT.to_string(),
            type_alias: None,
            import_links: false,
        }
    }

    pub fn write() -> Self {
        Self {
            mode: Mode::Write,
            ..Self::read()
        }
    }

    /// Group inside the file holding the payload (default: the root group).
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Header `TypeAlias` for files opened for writing (default: the logical type).
    pub fn type_alias(mut self, alias: impl Into<String>) -> Self {
        self.type_alias = Some(alias.into());
        self
    }

    /// Let containers written from this one link to its data instead of copying it.
    ///
    /// Only meaningful when reading; it is switched off (with a warning) for writes.
    pub fn import_links(mut self, import_links: bool) -> Self {
        self.import_links = import_links;
        self
    }
}

pub struct File<P: Payload> {
    payload: P,
    group: Option<GroupHandle>,
    resource: Option<Box<dyn Resource<P>>>,
    closed: bool,
}

impl<P: Payload> fmt::Debug for File<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("payload", &self.payload)
            .field("group", &self.group)
            .field("resource", &self.resource.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<P: Payload> File<P> {
    /// Open `filename`. Reading checks that the header declares this payload's type;
    /// writing creates a fresh container.
    pub fn open(session: &Session, filename: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let filename = filename.as_ref();
        let data_type = P::data_type().to_string();
        let registry = session.registry();

        let (group, payload) = match options.mode {
            Mode::Read => {
                let group = GroupHandle::open(
                    &registry,
                    filename,
                    &options.path,
                    Access::Read,
                    options.import_links,
                )?;
                let found = group.data_type().unwrap_or_default().to_string();
                if found != data_type {
                    return Err(ContainerError::TypeMismatch {
                        expected: data_type,
                        found,
                    });
                }
                let payload = P::from_group(session, group.share()?)?;
                (group, payload)
            }
            Mode::Write => {
                if options.import_links {
                    log::warn!(
                        "import_links has no effect on {} opened for writing; ignoring it",
                        filename.display()
                    );
                }
                let alias = options.type_alias.unwrap_or_else(|| data_type.clone());
                let header = Header::new(data_type, alias);
                let group = GroupHandle::open(
                    &registry,
                    filename,
                    &options.path,
                    Access::Write(header),
                    true,
                )?;
                (group, P::empty(session))
            }
        };

        Ok(Self {
            payload,
            group: Some(group),
            resource: None,
            closed: false,
        })
    }

    /// Wrap an in-memory payload. Nothing is opened.
    pub fn from_payload(payload: P) -> Self {
        Self {
            payload,
            group: None,
            resource: None,
            closed: false,
        }
    }

    /// Take ownership of `resource`, acquiring its payload now and releasing it on close.
    pub fn from_resource(mut resource: impl Resource<P> + 'static) -> Result<Self> {
        let payload = match resource.acquire() {
            Ok(payload) => payload,
            Err(err) => {
                if let Err(release_err) = resource.release() {
                    log::debug!("ignoring release error after failed acquire: {release_err}");
                }
                return Err(err);
            }
        };
        Ok(Self {
            payload,
            group: None,
            resource: Some(Box::new(resource)),
            closed: false,
        })
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn data_type(&self) -> DataType {
        P::data_type()
    }

    pub fn type_alias(&self) -> Option<String> {
        self.group
            .as_ref()
            .and_then(GroupHandle::type_alias)
            .map(str::to_string)
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.group
            .as_ref()
            .and_then(GroupHandle::filename)
            .map(Path::to_path_buf)
    }

    pub fn group(&self) -> Option<&GroupHandle> {
        self.group.as_ref()
    }

    pub fn can_write(&self) -> bool {
        self.group.as_ref().is_some_and(GroupHandle::can_write)
    }

    pub fn can_link(&self) -> bool {
        self.group.as_ref().is_some_and(GroupHandle::can_link)
    }

    /// Where the payload data lives, if it came from a file.
    pub fn origin(&self) -> Option<Location> {
        self.payload.origin()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn writable_group(&self) -> Option<&GroupHandle> {
        self.group.as_ref().filter(|group| group.can_write())
    }

    /// Commit this container's payload into `target`.
    ///
    /// Unmodified data is linked when both sides allow it and copied otherwise. Writing a
    /// payload back into the group it was read from does nothing. Afterwards `target`'s payload
    /// reads from what was written.
    pub fn writeback(&self, target: &mut File<P>) -> Result<()> {
        let group = target
            .writable_group()
            .ok_or(ContainerError::ReadOnlyTarget)?;
        if let (Some(origin), Some(location)) = (self.payload.origin(), group.location()) {
            if origin == location {
                return Ok(());
            }
        }
        self.payload.writeback_into(group)?;

        let session = target.payload.session();
        let reloaded = P::from_group(&session, group.share()?)?;
        target.payload = reloaded;
        Ok(())
    }

    /// Write the payload of a write-mode file to disk without closing it.
    pub fn flush(&self) -> Result<()> {
        let Some(group) = self.writable_group() else {
            return Ok(());
        };
        self.payload.writeback_into(group)?;
        group.flush()?;
        Ok(())
    }

    /// Shallow copy: a new in-memory container sharing this one's payload.
    pub fn copy(&self) -> Self {
        Self::from_payload(self.payload.clone())
    }

    /// Deep copy: a new in-memory container with its own copy of every value.
    pub fn deep_copy(&self) -> Result<Self> {
        Ok(Self::from_payload(self.payload.deep_copy()?))
    }

    /// Commit (for write mode) and release everything this container holds.
    ///
    /// Every step runs even if an earlier one fails; the first error is returned. Closing again
    /// is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_err: Option<ContainerError> = None;

        if let Some(group) = self.writable_group() {
            if let Err(err) = self.payload.writeback_into(group) {
                first_err.get_or_insert(err);
            }
        }

        let session = self.payload.session();
        drop(std::mem::replace(&mut self.payload, P::empty(&session)));

        if let Some(mut group) = self.group.take() {
            if let Err(err) = group.close() {
                first_err.get_or_insert(err.into());
            }
        }
        if let Some(mut resource) = self.resource.take() {
            if let Err(err) = resource.release() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<P: Payload> Drop for File<P> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("error while closing container: {err}");
        }
    }
}

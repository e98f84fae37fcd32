//! Group handles: a position (file + internal path) inside an open container.
//!
//! Reads resolve external links hop by hop. Each hop opens the target file read-only through
//! the session's [`FileRegistry`], so a chain of links shares handles with every other reader.

use crate::column::{Column, DType};
use crate::error::{Result, StorageError};
use crate::file::{Access, FileLease, FileRegistry, Mode};
use crate::header::Header;
use crate::path;
use crate::store::{Location, Node};
use std::collections::BTreeMap;
use std::path::Path;

/// Upper bound on external-link hops while resolving one entry.
pub const MAX_LINK_DEPTH: usize = 32;

/// Whether data can move from `source` to `target` by linking instead of copying.
pub fn transferable(source: &GroupHandle, target: &GroupHandle) -> bool {
    if !(source.can_link && target.can_link) {
        return false;
    }
    match (source.header(), target.header()) {
        (Some(a), Some(b)) => a.version == b.version,
        _ => false,
    }
}

/// A fully resolved entry: the open file holding it, its location and what it is.
#[derive(Debug)]
struct Resolved {
    lease: FileLease,
    location: Location,
    node: Node,
}

#[derive(Debug)]
pub struct GroupHandle {
    registry: FileRegistry,
    lease: Option<FileLease>,
    path: String,
    writable: bool,
    can_link: bool,
}

impl GroupHandle {
    /// Open the group at `path` inside `filename`.
    ///
    /// `Access::Read` requires the group to exist. `Access::Write` creates the container and
    /// every group along `path`.
    pub fn open(
        registry: &FileRegistry,
        filename: impl AsRef<Path>,
        path: &str,
        access: Access,
        can_link: bool,
    ) -> Result<Self> {
        let writable = matches!(access, Access::Write(_));
        let lease = registry.open(filename, access)?;
        let handle = Self {
            registry: registry.clone(),
            lease: Some(lease),
            path: path::normalize(path),
            writable,
            can_link,
        };
        handle.create_path("")?;
        Ok(handle)
    }

    fn lease(&self) -> Result<&FileLease> {
        self.lease.as_ref().ok_or(StorageError::Closed)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.lease.as_ref().is_some_and(|lease| !lease.file().is_closed())
    }

    pub fn filename(&self) -> Option<&Path> {
        self.lease.as_ref().map(|lease| lease.file().path())
    }

    pub fn header(&self) -> Option<&Header> {
        self.lease.as_ref().map(|lease| lease.file().header())
    }

    pub fn data_type(&self) -> Option<&str> {
        self.header().map(|header| header.data_type.as_str())
    }

    pub fn type_alias(&self) -> Option<&str> {
        self.header().map(|header| header.type_alias.as_str())
    }

    pub fn mode(&self) -> Option<Mode> {
        self.lease.as_ref().map(|lease| lease.file().mode())
    }

    /// Opened for writing and still open.
    pub fn can_write(&self) -> bool {
        self.writable && self.mode() == Some(Mode::Write)
    }

    pub fn can_link(&self) -> bool {
        self.can_link
    }

    pub fn location(&self) -> Option<Location> {
        self.filename().map(|file| Location::new(file, &self.path))
    }

    fn require_write(&self) -> Result<&FileLease> {
        let lease = self.lease()?;
        if !self.can_write() {
            return Err(StorageError::ReadOnly(lease.file().path().to_path_buf()));
        }
        Ok(lease)
    }

    /// Another handle on the same file, positioned at the same group.
    pub fn share(&self) -> Result<GroupHandle> {
        Ok(Self {
            registry: self.registry.clone(),
            lease: Some(self.lease()?.share()?),
            path: self.path.clone(),
            writable: self.writable,
            can_link: self.can_link,
        })
    }

    /// Make sure `relative` (escaped, `/`-delimited) exists as a group below this one.
    ///
    /// Write mode creates missing groups; read mode reports them as missing.
    pub fn create_path(&self, relative: &str) -> Result<()> {
        let lease = self.lease()?;
        let full = path::join_raw(&self.path, relative);
        let file = lease.file();
        let writable = self.can_write();
        file.with_store(|store| {
            if writable {
                return store.create_path(&full);
            }
            match store.node(&full)? {
                Some(Node::Group) => Ok(()),
                Some(_) => Err(StorageError::NotAGroup {
                    file: file.path().to_path_buf(),
                    path: full.clone(),
                }),
                None => Err(StorageError::MissingPath {
                    file: file.path().to_path_buf(),
                    path: full.clone(),
                }),
            }
        })
    }

    /// Handle on the child group `name`, following links in read mode.
    pub fn child(&self, name: &str) -> Result<GroupHandle> {
        if self.can_write() {
            let child = Self {
                registry: self.registry.clone(),
                lease: Some(self.lease()?.share()?),
                path: path::join(&self.path, name),
                writable: true,
                can_link: self.can_link,
            };
            child.create_path("")?;
            return Ok(child);
        }

        let resolved = self.resolve(name)?;
        match resolved.node {
            Node::Group => Ok(Self {
                registry: self.registry.clone(),
                lease: Some(resolved.lease),
                path: resolved.location.path,
                writable: false,
                can_link: self.can_link,
            }),
            _ => Err(StorageError::NotAGroup {
                file: resolved.location.file,
                path: resolved.location.path,
            }),
        }
    }

    fn resolve(&self, name: &str) -> Result<Resolved> {
        let lease = self.lease()?.share()?;
        let full = path::join(&self.path, name);
        self.resolve_in(lease, full, 0)
    }

    fn resolve_in(&self, lease: FileLease, full: String, depth: usize) -> Result<Resolved> {
        let file = lease.file().clone();
        let mut hop = None;
        let mut found = Node::Group;
        file.with_store(|store| {
            for prefix in path::prefixes(&full) {
                match store.node(&prefix)? {
                    Some(Node::Group) => {}
                    Some(Node::Dataset { dtype, len }) if prefix == full => {
                        found = Node::Dataset { dtype, len };
                    }
                    Some(Node::Dataset { .. }) => {
                        return Err(StorageError::NotAGroup {
                            file: file.path().to_path_buf(),
                            path: prefix,
                        })
                    }
                    Some(Node::Link(target)) => {
                        let rest = path::strip_prefix(&full, &prefix).unwrap_or_default();
                        hop = Some(Location {
                            path: path::join_raw(&target.path, rest),
                            file: target.file,
                        });
                        return Ok(());
                    }
                    None => {
                        return Err(StorageError::MissingPath {
                            file: file.path().to_path_buf(),
                            path: full.clone(),
                        })
                    }
                }
            }
            Ok(())
        })?;

        let Some(target) = hop else {
            return Ok(Resolved {
                location: Location::new(file.path(), &full),
                lease,
                node: found,
            });
        };
        if depth >= MAX_LINK_DEPTH {
            return Err(StorageError::LinkDepthExceeded(MAX_LINK_DEPTH));
        }
        let next = if sylph_fs::absolute_path(&target.file)? == file.path() {
            lease.share()?
        } else {
            self.registry.open(&target.file, Access::Read)?
        };
        drop(lease);
        self.resolve_in(next, target.path, depth + 1)
    }

    /// Entry names directly below this group (links are not followed), in creation order.
    pub fn children(&self) -> Result<Vec<String>> {
        let lease = self.lease()?;
        lease.file().with_store(|store| store.children(&self.path))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        match self.resolve(name) {
            Ok(_) => Ok(true),
            Err(StorageError::MissingPath { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Element type and length of the dataset `name`, without reading its payload.
    pub fn dataset_info(&self, name: &str) -> Result<(DType, usize)> {
        let resolved = self.resolve(name)?;
        match resolved.node {
            Node::Dataset { dtype, len } => Ok((dtype, len)),
            _ => Err(StorageError::NotADataset {
                file: resolved.location.file,
                path: resolved.location.path,
            }),
        }
    }

    pub fn read_column(&self, name: &str) -> Result<Column> {
        let resolved = self.resolve(name)?;
        let file = resolved.lease.file();
        let encoded = file.with_store(|store| store.read_dataset(&resolved.location.path))?;
        Ok(file.counters().decode(&encoded)?)
    }

    pub fn write_column(&self, name: &str, column: &Column) -> Result<()> {
        let lease = self.require_write()?;
        let file = lease.file();
        let encoded = file.counters().encode(column)?;
        let full = path::join(&self.path, name);
        file.with_store(|store| store.put_dataset(&full, &encoded))
    }

    /// Final location of `name` after following every link, suitable as a link target.
    pub fn link_target(&self, name: &str) -> Result<Location> {
        Ok(self.resolve(name)?.location)
    }

    /// Store an external link at `name` pointing at `target`.
    pub fn put_link(&self, name: &str, target: &Location) -> Result<()> {
        let lease = self.require_write()?;
        let file = lease.file();
        let full = path::join(&self.path, name);
        file.with_store(|store| store.put_link(&full, target))?;
        file.counters().record_link();
        Ok(())
    }

    /// Link `name` to whatever `source_name` in `source` resolves to.
    pub fn link_from(&self, name: &str, source: &GroupHandle, source_name: &str) -> Result<()> {
        let target = source.link_target(source_name)?;
        self.put_link(name, &target)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let lease = self.require_write()?;
        let full = path::join(&self.path, name);
        lease.file().with_store(|store| store.remove(&full))
    }

    /// Remove everything below this group, keeping the group itself.
    pub fn clear(&self) -> Result<()> {
        let lease = self.require_write()?;
        let file = lease.file();
        file.with_store(|store| {
            for name in store.children(&self.path)? {
                store.remove(&path::join(&self.path, &name))?;
            }
            Ok(())
        })
    }

    pub fn set_attribute(&self, name: &str, value: &serde_json::Value) -> Result<()> {
        let lease = self.require_write()?;
        lease
            .file()
            .with_store(|store| store.set_attribute(&self.path, name, value))
    }

    pub fn attribute(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let lease = self.lease()?;
        lease
            .file()
            .with_store(|store| store.attribute(&self.path, name))
    }

    pub fn attributes(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let lease = self.lease()?;
        lease.file().with_store(|store| store.attributes(&self.path))
    }

    /// Persist the file now instead of waiting for the last release. No-op in read mode.
    pub fn flush(&self) -> Result<()> {
        self.lease()?.file().persist()
    }

    /// Release this handle's reference on its file. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        match self.lease.take() {
            Some(mut lease) => lease.release(),
            None => Ok(()),
        }
    }
}

impl Drop for GroupHandle {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close group {}: {err}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecCounters;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn registry() -> FileRegistry {
        FileRegistry::new(Arc::new(CodecCounters::default()))
    }

    #[test]
    fn read_mode_does_not_create_groups() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("g.sydata");
        let registry = registry();
        GroupHandle::open(&registry, &path, "/", Access::Write(Header::new("table", "table")), true)
            .expect("create");

        let err = GroupHandle::open(&registry, &path, "/missing", Access::Read, true)
            .expect_err("missing group");
        assert!(matches!(err, StorageError::MissingPath { .. }), "{err:?}");
    }

    #[test]
    fn names_with_separators_round_trip() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("names.sydata");
        let registry = registry();
        let group = GroupHandle::open(
            &registry,
            &path,
            "/",
            Access::Write(Header::new("table", "table")),
            true,
        )
        .expect("create");
        group
            .write_column("a/b\\c", &Column::from(vec![1_i64, 2]))
            .expect("write");
        assert_eq!(group.children().expect("children"), vec!["a/b\\c".to_string()]);
        assert_eq!(
            group.read_column("a/b\\c").expect("read"),
            Column::from(vec![1_i64, 2])
        );
    }

    #[test]
    fn close_is_idempotent() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("c.sydata");
        let registry = registry();
        let mut group = GroupHandle::open(
            &registry,
            &path,
            "/",
            Access::Write(Header::new("text", "text")),
            false,
        )
        .expect("create");
        group.close().expect("first close");
        group.close().expect("second close");
        assert!(!group.is_open());
        assert!(matches!(group.children(), Err(StorageError::Closed)));
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("ro.sydata");
        let registry = registry();
        GroupHandle::open(&registry, &path, "/", Access::Write(Header::new("table", "table")), true)
            .expect("create");
        let group = GroupHandle::open(&registry, &path, "/", Access::Read, true).expect("open");
        let err = group
            .write_column("x", &Column::from(vec![true]))
            .expect_err("read only");
        assert!(matches!(err, StorageError::ReadOnly(_)), "{err:?}");
    }
}

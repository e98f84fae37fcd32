//! Physical container files and the per-session registry that shares them.
//!
//! Every container file is opened at most once per registry: repeated opens hand out
//! reference-counted [`FileLease`]s on the same [`PhysicalFile`]. A write-mode file keeps its
//! store in memory and is persisted (header region + store image) when the last lease is
//! released or when it is flushed explicitly.

use crate::codec::CodecCounters;
use crate::error::{Result, StorageError};
use crate::header::{encode_region_with_size, header_size, read_header_region, Header, HeaderError};
use crate::store::Store;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// How a file is opened through the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Open an existing, validly headered container.
    Read,
    /// Create (or truncate) a container with the given header.
    Write(Header),
}

#[derive(Debug)]
pub struct PhysicalFile {
    path: PathBuf,
    mode: Mode,
    header: Header,
    header_size: usize,
    store: Mutex<Option<Store>>,
    counters: Arc<CodecCounters>,
}

impl PhysicalFile {
    fn create(path: PathBuf, header: Header, counters: Arc<CodecCounters>) -> Result<Self> {
        let store = Store::open_in_memory(&path)?;
        let file = Self {
            header_size: header_size(&header.data_type, &header.type_alias),
            path,
            mode: Mode::Write,
            header,
            store: Mutex::new(Some(store)),
            counters,
        };
        // The container exists on disk from the moment it is opened for writing.
        file.persist()?;
        Ok(file)
    }

    fn open_existing(path: PathBuf, counters: Arc<CodecCounters>) -> Result<Self> {
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::FileNotFound(path))
            }
            Err(err) => return Err(err.into()),
        };
        let region = read_header_region(&mut Cursor::new(&bytes))?;
        // A file cut inside its reserved region has lost its data region.
        let image = bytes.get(region.size..).ok_or(HeaderError::Truncated)?;
        let store = Store::from_image(&path, image)?;
        Ok(Self {
            path,
            mode: Mode::Read,
            header: region.header,
            header_size: region.size,
            store: Mutex::new(Some(store)),
            counters,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn counters(&self) -> &CodecCounters {
        &self.counters
    }

    /// Run `f` against the open store. The store lock is held for the duration of `f`.
    pub fn with_store<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        let guard = self.store.lock().expect("physical file mutex poisoned");
        let store = guard.as_ref().ok_or(StorageError::Closed)?;
        f(store)
    }

    fn persist_store(&self, store: &Store) -> Result<()> {
        let region = encode_region_with_size(&self.header, self.header_size)?;
        let image = store.image()?;
        sylph_fs::persist_regions(&self.path, &[&region, &image])?;
        Ok(())
    }

    /// Write the current contents to disk. A no-op for read-mode files.
    pub fn persist(&self) -> Result<()> {
        if self.mode == Mode::Read {
            return Ok(());
        }
        self.with_store(|store| self.persist_store(store))
    }

    pub fn is_closed(&self) -> bool {
        self.store
            .lock()
            .expect("physical file mutex poisoned")
            .is_none()
    }

    /// Persist (write mode) and drop the store. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.store.lock().expect("physical file mutex poisoned");
        let Some(store) = guard.take() else {
            return Ok(());
        };
        if self.mode == Mode::Write {
            self.persist_store(&store)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RegistryEntry {
    file: Arc<PhysicalFile>,
    refs: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    files: HashMap<PathBuf, RegistryEntry>,
}

/// Open physical files, keyed by absolute path.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    counters: Arc<CodecCounters>,
}

impl FileRegistry {
    pub fn new(counters: Arc<CodecCounters>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<CodecCounters> {
        &self.counters
    }

    /// Open `path` for reading (sharing any open handle) or create it for writing.
    ///
    /// Creating a file that is already open in this registry, in any mode, is refused.
    pub fn open(&self, path: impl AsRef<Path>, access: Access) -> Result<FileLease> {
        let path = sylph_fs::absolute_path(path)?;
        let mut inner = self.inner.lock().expect("file registry mutex poisoned");

        let file = match access {
            Access::Read => {
                if let Some(entry) = inner.files.get_mut(&path) {
                    entry.refs = entry.refs.saturating_add(1);
                    return Ok(self.lease(entry.file.clone()));
                }
                Arc::new(PhysicalFile::open_existing(path.clone(), self.counters.clone())?)
            }
            Access::Write(header) => {
                if inner.files.contains_key(&path) {
                    return Err(StorageError::FileInUse(path));
                }
                Arc::new(PhysicalFile::create(path.clone(), header, self.counters.clone())?)
            }
        };

        inner.files.insert(
            path,
            RegistryEntry {
                file: file.clone(),
                refs: 1,
            },
        );
        Ok(self.lease(file))
    }

    fn lease(&self, file: Arc<PhysicalFile>) -> FileLease {
        FileLease {
            file,
            registry: self.inner.clone(),
            released: false,
        }
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        self.ref_count(path) > 0
    }

    /// Number of live leases on `path` (0 when it is not open).
    pub fn ref_count(&self, path: impl AsRef<Path>) -> usize {
        let Ok(path) = sylph_fs::absolute_path(path) else {
            return 0;
        };
        self.inner
            .lock()
            .expect("file registry mutex poisoned")
            .files
            .get(&path)
            .map_or(0, |entry| entry.refs)
    }

    pub fn open_count(&self) -> usize {
        self.inner
            .lock()
            .expect("file registry mutex poisoned")
            .files
            .len()
    }

    /// Close every open file regardless of outstanding leases.
    ///
    /// Outstanding leases stay valid to release but their files report [`StorageError::Closed`].
    /// Returns the first close error after attempting every file.
    pub fn close_all(&self) -> Result<()> {
        let files: Vec<_> = {
            let mut inner = self.inner.lock().expect("file registry mutex poisoned");
            inner.files.drain().map(|(_, entry)| entry.file).collect()
        };
        let mut first_err = None;
        for file in files {
            if let Err(err) = file.close() {
                log::warn!("failed to close {}: {err}", file.path().display());
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// One counted reference to an open [`PhysicalFile`]. Released on drop.
#[derive(Debug)]
pub struct FileLease {
    file: Arc<PhysicalFile>,
    registry: Arc<Mutex<RegistryInner>>,
    released: bool,
}

impl FileLease {
    pub fn file(&self) -> &Arc<PhysicalFile> {
        &self.file
    }

    /// Take another reference on the same file.
    pub fn share(&self) -> Result<FileLease> {
        if self.released {
            return Err(StorageError::Closed);
        }
        let mut inner = self.registry.lock().expect("file registry mutex poisoned");
        match inner.files.get_mut(self.file.path()) {
            Some(entry) if Arc::ptr_eq(&entry.file, &self.file) => {
                entry.refs = entry.refs.saturating_add(1);
                Ok(FileLease {
                    file: self.file.clone(),
                    registry: self.registry.clone(),
                    released: false,
                })
            }
            _ => Err(StorageError::Closed),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drop this reference; the last one closes (and for write mode persists) the file.
    /// Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let last = {
            let mut inner = self.registry.lock().expect("file registry mutex poisoned");
            match inner.files.get_mut(self.file.path()) {
                Some(entry) if Arc::ptr_eq(&entry.file, &self.file) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    if entry.refs == 0 {
                        inner.files.remove(self.file.path());
                        true
                    } else {
                        false
                    }
                }
                // Already dropped from the registry (e.g. `close_all`); closing is idempotent.
                _ => true,
            }
        };

        if last {
            self.file.close()?;
        }
        Ok(())
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("failed to release {}: {err}", self.file.path().display());
        }
    }
}

//! Session state: the spill cache, the open-file registry and codec counters.
//!
//! Sessions are explicit values passed to the container layer. A process-wide default exists
//! for callers that do not manage their own ([`Session::global`]), and [`with_fresh_session`]
//! swaps it out for the duration of a closure.

use crate::cache::{CacheConfig, SpillCache, DEFAULT_MAX_BYTES};
use crate::codec::{CodecCounters, CodecStats};
use crate::error::Result;
use crate::file::FileRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

pub const ENV_CACHE_MAX_BYTES: &str = "SYLPH_CACHE_MAX_BYTES";
pub const ENV_SPILL_DIR: &str = "SYLPH_SPILL_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Resident byte cap of the spill cache (default: 512 MiB).
    pub cache_max_bytes: usize,
    /// Where spilled data goes. `None` keeps it in memory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: DEFAULT_MAX_BYTES,
            spill_dir: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `SYLPH_CACHE_MAX_BYTES` and `SYLPH_SPILL_DIR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(ENV_CACHE_MAX_BYTES) {
            match value.trim().parse::<usize>() {
                Ok(max_bytes) => config.cache_max_bytes = max_bytes,
                Err(err) => log::warn!("ignoring {ENV_CACHE_MAX_BYTES}={value:?}: {err}"),
            }
        }
        if let Some(dir) = env::var_os(ENV_SPILL_DIR).filter(|dir| !dir.is_empty()) {
            config.spill_dir = Some(PathBuf::from(dir));
        }
        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_bytes: self.cache_max_bytes,
            spill_dir: self.spill_dir.clone(),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    config: SessionConfig,
    cache: SpillCache,
    registry: FileRegistry,
    counters: Arc<CodecCounters>,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl SessionInner {
    fn new(config: SessionConfig) -> Self {
        let counters = Arc::new(CodecCounters::default());
        Self {
            cache: SpillCache::new(config.cache_config()),
            registry: FileRegistry::new(counters.clone()),
            counters,
            config,
            attributes: BTreeMap::new(),
        }
    }
}

/// Shared session handle. Clones refer to the same session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner::new(config))),
        }
    }

    /// The process-wide default session, built from [`SessionConfig::from_env`] on first use.
    pub fn global() -> Session {
        global_slot()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> SessionConfig {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .config
            .clone()
    }

    pub fn cache(&self) -> SpillCache {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .cache
            .clone()
    }

    pub fn registry(&self) -> FileRegistry {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .registry
            .clone()
    }

    pub fn counters(&self) -> Arc<CodecCounters> {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .counters
            .clone()
    }

    pub fn codec_stats(&self) -> CodecStats {
        self.counters().snapshot()
    }

    pub fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .attributes
            .clone()
    }

    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .attributes
            .get(name)
            .cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: serde_json::Value) {
        self.inner
            .lock()
            .expect("session mutex poisoned")
            .attributes
            .insert(name.into(), value);
    }

    /// Tear down the cache and registry, start over with fresh ones and record `attributes`.
    ///
    /// Outstanding containers from before the call keep working on their own data only.
    pub fn create(&self, attributes: BTreeMap<String, serde_json::Value>) -> Result<()> {
        let closed = self.clear();
        {
            let mut inner = self.inner.lock().expect("session mutex poisoned");
            let config = inner.config.clone();
            *inner = SessionInner::new(config);
            inner.attributes = attributes;
        }
        closed
    }

    /// Close every open file and drop all cached data.
    pub fn clear(&self) -> Result<()> {
        let (cache, registry) = {
            let inner = self.inner.lock().expect("session mutex poisoned");
            (inner.cache.clone(), inner.registry.clone())
        };
        cache.clear();
        registry.close_all()
    }

    /// Drop cached column data only; open files stay open.
    pub fn clear_data(&self) {
        self.cache().clear();
    }
}

fn global_slot() -> &'static Mutex<Session> {
    static GLOBAL: OnceLock<Mutex<Session>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(Session::new(SessionConfig::from_env())))
}

fn replace_global(session: Session) -> Session {
    let mut slot = global_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *slot, session)
}

struct RestoreGlobal {
    previous: Option<Session>,
}

impl Drop for RestoreGlobal {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let fresh = replace_global(previous);
        if let Err(err) = fresh.clear() {
            log::debug!("ignoring error while discarding temporary session: {err}");
        }
    }
}

/// Run `body` with a brand-new global session, restoring the previous one afterwards (also when
/// `body` panics). The temporary session is cleared on the way out.
pub fn with_fresh_session<T>(body: impl FnOnce(&Session) -> T) -> T {
    let fresh = Session::new(Session::global().config());
    let _restore = RestoreGlobal {
        previous: Some(replace_global(fresh.clone())),
    };
    body(&fresh)
}

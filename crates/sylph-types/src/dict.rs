use crate::collection::{load, writeback_elements, Element};
use crate::datatype::DataType;
use crate::error::{ContainerError, Result};
use crate::payload::Payload;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sylph_storage::{GroupHandle, Location, Session};

#[derive(Debug)]
struct DictInner<P> {
    session: Session,
    source: Option<GroupHandle>,
    entries: BTreeMap<String, Element<P>>,
}

/// A mapping from names to containers, populated lazily.
///
/// A value is fetched from its file the first time it is asked for and kept from then on; it is
/// never fetched again unless replaced through [`Dict::insert`].
#[derive(Debug, Clone)]
pub struct Dict<P> {
    inner: Arc<Mutex<DictInner<P>>>,
}

impl<P: Payload> Dict<P> {
    pub fn new(session: &Session) -> Self {
        Self::build(session, None, BTreeMap::new())
    }

    fn build(
        session: &Session,
        source: Option<GroupHandle>,
        entries: BTreeMap<String, Element<P>>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DictInner {
                session: session.clone(),
                source,
                entries,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DictInner<P>> {
        self.inner.lock().expect("dict mutex poisoned")
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<P> {
        let mut inner = self.lock();
        let DictInner {
            session,
            source,
            entries,
        } = &mut *inner;
        let element = entries
            .get_mut(key)
            .ok_or_else(|| ContainerError::MissingElement(key.to_string()))?;
        load(session, source.as_ref(), element)
    }

    pub fn insert(&self, key: impl Into<String>, value: P) {
        self.lock().entries.insert(key.into(), Element::Loaded(value));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Whether `key` has been fetched (or was set in memory).
    pub fn is_cached(&self, key: &str) -> bool {
        matches!(self.lock().entries.get(key), Some(Element::Loaded(_)))
    }

    /// Fetch every value not fetched yet. Calling it again does nothing.
    pub fn cache_all(&self) -> Result<()> {
        for key in self.keys() {
            self.get(&key)?;
        }
        Ok(())
    }

    pub fn items(&self) -> Result<Vec<(String, P)>> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }
}

impl<P: Payload> Payload for Dict<P> {
    fn data_type() -> DataType {
        DataType::dict(P::data_type())
    }

    fn empty(session: &Session) -> Self {
        Dict::new(session)
    }

    fn from_group(session: &Session, group: GroupHandle) -> Result<Self> {
        let entries = group
            .children()?
            .into_iter()
            .map(|key| (key.clone(), Element::Stored(key)))
            .collect();
        Ok(Dict::build(session, Some(group), entries))
    }

    fn session(&self) -> Session {
        self.lock().session.clone()
    }

    fn origin(&self) -> Option<Location> {
        self.lock().source.as_ref().and_then(GroupHandle::location)
    }

    fn writeback_into(&self, target: &GroupHandle) -> Result<()> {
        let mut inner = self.lock();
        let DictInner {
            session,
            source,
            entries,
        } = &mut *inner;
        let elements = entries
            .iter_mut()
            .map(|(key, element)| (key.clone(), element))
            .collect();
        writeback_elements(session, source.as_ref(), elements, target)
    }

    fn deep_copy(&self) -> Result<Self> {
        let copy = Dict::new(&self.session());
        for (key, value) in self.items()? {
            copy.insert(key, value.deep_copy()?);
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::List;
    use crate::text::Text;

    #[test]
    fn in_memory_values_count_as_cached() {
        let session = Session::default();
        let dict = Dict::new(&session);
        dict.insert("b", Text::new(&session, "2"));
        dict.insert("a", Text::new(&session, "1"));

        assert_eq!(dict.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(dict.is_cached("a"));
        dict.cache_all().expect("cache all");
        dict.cache_all().expect("cache all again");
        assert_eq!(dict.get("a").expect("a").get().expect("text"), "1");
        assert!(matches!(dict.get("c"), Err(ContainerError::MissingElement(_))));
    }

    #[test]
    fn dict_type_wraps_element_type() {
        assert_eq!(Dict::<List<Text>>::data_type().to_string(), "{[text]}");
    }
}

use crate::collection::{load, writeback_elements, Element};
use crate::datatype::DataType;
use crate::error::{ContainerError, Result};
use crate::payload::Payload;
use std::sync::{Arc, Mutex};
use sylph_storage::{GroupHandle, Location, Session};

#[derive(Debug)]
struct ListInner<P> {
    session: Session,
    source: Option<GroupHandle>,
    items: Vec<Element<P>>,
}

/// An ordered list of containers. Elements read from a file load on first access.
#[derive(Debug, Clone)]
pub struct List<P> {
    inner: Arc<Mutex<ListInner<P>>>,
}

impl<P: Payload> List<P> {
    pub fn new(session: &Session) -> Self {
        Self::from_items(session, Vec::new())
    }

    pub fn from_items(session: &Session, items: Vec<P>) -> Self {
        Self::build(session, None, items.into_iter().map(Element::Loaded).collect())
    }

    fn build(session: &Session, source: Option<GroupHandle>, items: Vec<Element<P>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListInner {
                session: session.clone(),
                source,
                items,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListInner<P>> {
        self.inner.lock().expect("list mutex poisoned")
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<P> {
        let mut inner = self.lock();
        let ListInner {
            session,
            source,
            items,
        } = &mut *inner;
        let element = items
            .get_mut(index)
            .ok_or_else(|| ContainerError::MissingElement(index.to_string()))?;
        load(session, source.as_ref(), element)
    }

    pub fn push(&self, item: P) {
        self.lock().items.push(Element::Loaded(item));
    }

    pub fn set(&self, index: usize, item: P) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner
            .items
            .get_mut(index)
            .ok_or_else(|| ContainerError::MissingElement(index.to_string()))?;
        *slot = Element::Loaded(item);
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<P> {
        let item = self.get(index)?;
        self.lock().items.remove(index);
        Ok(item)
    }

    /// Load every element.
    pub fn cache_all(&self) -> Result<()> {
        for index in 0..self.len() {
            self.get(index)?;
        }
        Ok(())
    }

    pub fn items(&self) -> Result<Vec<P>> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }
}

impl<P: Payload> Payload for List<P> {
    fn data_type() -> DataType {
        DataType::list(P::data_type())
    }

    fn empty(session: &Session) -> Self {
        List::new(session)
    }

    fn from_group(session: &Session, group: GroupHandle) -> Result<Self> {
        let mut indices = Vec::new();
        for name in group.children()? {
            let index: usize = name
                .parse()
                .map_err(|_| ContainerError::Metadata(format!("list element name {name:?}")))?;
            indices.push(index);
        }
        indices.sort_unstable();
        let items = indices
            .into_iter()
            .map(|index| Element::Stored(index.to_string()))
            .collect();
        Ok(List::build(session, Some(group), items))
    }

    fn session(&self) -> Session {
        self.lock().session.clone()
    }

    fn origin(&self) -> Option<Location> {
        self.lock().source.as_ref().and_then(GroupHandle::location)
    }

    fn writeback_into(&self, target: &GroupHandle) -> Result<()> {
        let mut inner = self.lock();
        let ListInner {
            session,
            source,
            items,
        } = &mut *inner;
        let elements = items
            .iter_mut()
            .enumerate()
            .map(|(index, element)| (index.to_string(), element))
            .collect();
        writeback_elements(session, source.as_ref(), elements, target)
    }

    fn deep_copy(&self) -> Result<Self> {
        let items = self
            .items()?
            .iter()
            .map(P::deep_copy)
            .collect::<Result<Vec<_>>>()?;
        Ok(List::from_items(&self.session(), items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Text;

    #[test]
    fn list_type_wraps_element_type() {
        assert_eq!(List::<Text>::data_type().to_string(), "[text]");
        assert_eq!(List::<List<Text>>::data_type().to_string(), "[[text]]");
    }

    #[test]
    fn out_of_range_access_is_reported() {
        let session = Session::default();
        let list = List::from_items(&session, vec![Text::new(&session, "a")]);
        assert!(matches!(list.get(1), Err(ContainerError::MissingElement(_))));
        assert_eq!(list.remove(0).expect("remove").get().expect("text"), "a");
        assert!(list.is_empty());
    }
}

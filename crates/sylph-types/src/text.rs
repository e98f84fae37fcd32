use crate::datatype::DataType;
use crate::error::{ContainerError, Result};
use crate::payload::{can_link, same_origin, Payload};
use std::sync::{Arc, Mutex};
use sylph_storage::{Column, GroupHandle, Location, Session};

const VALUE: &str = "value";

#[derive(Debug)]
struct TextInner {
    session: Session,
    source: Option<GroupHandle>,
    value: Option<String>,
    stored: bool,
}

/// A single text value, read from its file on first access.
#[derive(Debug, Clone)]
pub struct Text {
    inner: Arc<Mutex<TextInner>>,
}

fn read_value(group: &GroupHandle) -> Result<String> {
    if !group.contains(VALUE)? {
        return Ok(String::new());
    }
    match group.read_column(VALUE)? {
        Column::Text(values) => Ok(values.into_iter().next().unwrap_or_default()),
        other => Err(ContainerError::Metadata(format!(
            "text value stored as {}",
            other.dtype()
        ))),
    }
}

impl Text {
    pub fn new(session: &Session, value: impl Into<String>) -> Self {
        Self::build(session, None, Some(value.into()), false)
    }

    fn build(
        session: &Session,
        source: Option<GroupHandle>,
        value: Option<String>,
        stored: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TextInner {
                session: session.clone(),
                source,
                value,
                stored,
            })),
        }
    }

    pub fn get(&self) -> Result<String> {
        let mut inner = self.inner.lock().expect("text mutex poisoned");
        if let Some(value) = &inner.value {
            return Ok(value.clone());
        }
        let value = match &inner.source {
            Some(source) => read_value(source)?,
            None => String::new(),
        };
        inner.value = Some(value.clone());
        Ok(value)
    }

    pub fn set(&self, value: impl Into<String>) {
        let mut inner = self.inner.lock().expect("text mutex poisoned");
        inner.value = Some(value.into());
        inner.stored = false;
    }
}

impl Payload for Text {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn empty(session: &Session) -> Self {
        Text::new(session, "")
    }

    fn from_group(session: &Session, group: GroupHandle) -> Result<Self> {
        Ok(Text::build(session, Some(group), None, true))
    }

    fn session(&self) -> Session {
        self.inner
            .lock()
            .expect("text mutex poisoned")
            .session
            .clone()
    }

    fn origin(&self) -> Option<Location> {
        self.inner
            .lock()
            .expect("text mutex poisoned")
            .source
            .as_ref()
            .and_then(GroupHandle::location)
    }

    fn writeback_into(&self, target: &GroupHandle) -> Result<()> {
        let inner = self.inner.lock().expect("text mutex poisoned");
        let source = inner.source.as_ref();
        if inner.stored && same_origin(source, target) {
            return Ok(());
        }
        target.clear()?;
        if inner.stored && can_link(source, target) {
            if let Some(source) = source {
                if source.contains(VALUE)? {
                    target.link_from(VALUE, source, VALUE)?;
                }
                return Ok(());
            }
        }
        let value = match (&inner.value, source) {
            (Some(value), _) => value.clone(),
            (None, Some(source)) => read_value(source)?,
            (None, None) => String::new(),
        };
        target.write_column(VALUE, &Column::Text(vec![value]))?;
        Ok(())
    }

    fn deep_copy(&self) -> Result<Self> {
        let value = self.get()?;
        Ok(Text::new(&self.session(), value))
    }
}

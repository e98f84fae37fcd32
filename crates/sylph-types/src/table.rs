//! Tables: ordered, equally long named columns plus a name and free-form attributes.
//!
//! A table read from a file only records each column's type and length up front. Column data is
//! read on first access and parked in the session's spill cache. Columns that were never
//! modified keep pointing at their stored copy, which is what lets writeback link them.

use crate::datatype::DataType;
use crate::error::{ContainerError, Result};
use crate::payload::{can_link, same_origin, Payload};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sylph_storage::{CacheHandle, Column, DType, GroupHandle, Location, Session};

const NAME_ATTR: &str = "name";
const COLUMNS_ATTR: &str = "columns";
const ATTRIBUTES_ATTR: &str = "attributes";

#[derive(Debug)]
struct Slot {
    dtype: DType,
    len: usize,
    cached: Option<CacheHandle>,
    /// The source group holds exactly this column's data under the column name.
    stored: bool,
}

#[derive(Debug)]
struct TableInner {
    session: Session,
    source: Option<GroupHandle>,
    name: String,
    columns: Vec<(String, Slot)>,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl TableInner {
    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(column, _)| column == name)
    }

    fn rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, slot)| slot.len)
    }

    fn load(&mut self, index: usize) -> Result<Arc<Column>> {
        let (name, slot) = &self.columns[index];
        if let Some(handle) = &slot.cached {
            // Stored columns dropped from the cache (e.g. `Session::clear_data`) are re-read.
            if !slot.stored || handle.is_live() {
                return Ok(handle.get()?);
            }
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ContainerError::MissingColumn(name.clone()))?;
        let column = source.read_column(name)?;
        let handle = self.session.cache().insert(column)?;
        let value = handle.get()?;
        self.columns[index].1.cached = Some(handle);
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    inner: Arc<Mutex<TableInner>>,
}

impl Table {
    pub fn new(session: &Session) -> Self {
        Self::with_source(session, None, String::new(), Vec::new(), BTreeMap::new())
    }

    fn with_source(
        session: &Session,
        source: Option<GroupHandle>,
        name: String,
        columns: Vec<(String, Slot)>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableInner {
                session: session.clone(),
                source,
                name,
                columns,
                attributes,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().expect("table mutex poisoned")
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().name = name.into();
    }

    pub fn column_names(&self) -> Vec<String> {
        self.lock()
            .columns
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.lock().position(name).is_some()
    }

    pub fn number_of_columns(&self) -> usize {
        self.lock().columns.len()
    }

    pub fn number_of_rows(&self) -> usize {
        self.lock().rows()
    }

    pub fn column_type(&self, name: &str) -> Option<DType> {
        let inner = self.lock();
        inner.position(name).map(|index| inner.columns[index].1.dtype)
    }

    pub fn get_column(&self, name: &str) -> Result<Arc<Column>> {
        let mut inner = self.lock();
        let index = inner
            .position(name)
            .ok_or_else(|| ContainerError::MissingColumn(name.to_string()))?;
        inner.load(index)
    }

    /// Add or replace the column `name`. Replacing keeps the column's position.
    ///
    /// Every column of a table has the same length; a column of a different length is refused
    /// unless it replaces the only column.
    pub fn set_column(&self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        let mut inner = self.lock();
        let existing = inner.position(&name);
        let others = inner.columns.len() - usize::from(existing.is_some());
        if others > 0 {
            let expected = inner
                .columns
                .iter()
                .find(|(other, _)| *other != name)
                .map_or(0, |(_, slot)| slot.len);
            if column.len() != expected {
                return Err(ContainerError::ColumnLength {
                    name,
                    expected,
                    found: column.len(),
                });
            }
        }

        let slot = Slot {
            dtype: column.dtype(),
            len: column.len(),
            cached: None,
            stored: false,
        };
        let handle = inner.session.cache().insert(column)?;
        let slot = Slot {
            cached: Some(handle),
            ..slot
        };
        match existing {
            Some(index) => inner.columns[index].1 = slot,
            None => inner.columns.push((name, slot)),
        }
        Ok(())
    }

    pub fn remove_column(&self, name: &str) -> bool {
        let mut inner = self.lock();
        match inner.position(name) {
            Some(index) => {
                inner.columns.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        self.lock().attributes.clone()
    }

    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.lock().attributes.get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: serde_json::Value) {
        self.lock().attributes.insert(name.into(), value);
    }

    /// Copy every column and attribute of `other` into this table, replacing same-named columns.
    pub fn update(&self, other: &Table) -> Result<()> {
        for name in other.column_names() {
            let column = other.get_column(&name)?;
            self.set_column(name, (*column).clone())?;
        }
        let attributes = other.attributes();
        self.lock().attributes.extend(attributes);
        Ok(())
    }
}

impl Payload for Table {
    fn data_type() -> DataType {
        DataType::Table
    }

    fn empty(session: &Session) -> Self {
        Table::new(session)
    }

    fn from_group(session: &Session, group: GroupHandle) -> Result<Self> {
        let mut stored = group.attributes()?;
        let name = match stored.remove(NAME_ATTR) {
            Some(serde_json::Value::String(name)) => name,
            Some(other) => return Err(ContainerError::Metadata(format!("table name {other}"))),
            None => String::new(),
        };
        let order: Vec<String> = match stored.remove(COLUMNS_ATTR) {
            Some(value) => serde_json::from_value(value)
                .map_err(|err| ContainerError::Metadata(format!("column order: {err}")))?,
            None => group.children()?,
        };
        let attributes = match stored.remove(ATTRIBUTES_ATTR) {
            Some(value) => serde_json::from_value(value)
                .map_err(|err| ContainerError::Metadata(format!("table attributes: {err}")))?,
            None => BTreeMap::new(),
        };

        let mut columns = Vec::with_capacity(order.len());
        for column in order {
            let (dtype, len) = group.dataset_info(&column)?;
            columns.push((
                column,
                Slot {
                    dtype,
                    len,
                    cached: None,
                    stored: true,
                },
            ));
        }
        Ok(Table::with_source(session, Some(group), name, columns, attributes))
    }

    fn session(&self) -> Session {
        self.lock().session.clone()
    }

    fn origin(&self) -> Option<Location> {
        self.lock().source.as_ref().and_then(GroupHandle::location)
    }

    fn writeback_into(&self, target: &GroupHandle) -> Result<()> {
        let mut inner = self.lock();
        let in_place = same_origin(inner.source.as_ref(), target);
        let linkable = can_link(inner.source.as_ref(), target);

        if in_place {
            for child in target.children()? {
                if inner.position(&child).is_none() {
                    target.remove(&child)?;
                }
            }
        } else {
            target.clear()?;
        }

        for index in 0..inner.columns.len() {
            let (name, slot) = &inner.columns[index];
            if slot.stored && in_place {
                continue;
            }
            if slot.stored && linkable {
                if let Some(source) = inner.source.as_ref() {
                    target.link_from(name, source, name)?;
                    continue;
                }
            }
            let name = name.clone();
            let column = inner.load(index)?;
            target.write_column(&name, &column)?;
        }

        let order: Vec<&str> = inner.columns.iter().map(|(name, _)| name.as_str()).collect();
        target.set_attribute(NAME_ATTR, &serde_json::Value::String(inner.name.clone()))?;
        target.set_attribute(COLUMNS_ATTR, &serde_json::json!(order))?;
        target.set_attribute(ATTRIBUTES_ATTR, &serde_json::json!(inner.attributes))?;
        Ok(())
    }

    fn deep_copy(&self) -> Result<Self> {
        let mut inner = self.lock();
        let mut columns = Vec::with_capacity(inner.columns.len());
        for index in 0..inner.columns.len() {
            let value = inner.load(index)?;
            let (name, slot) = &inner.columns[index];
            let handle = inner.session.cache().insert((*value).clone())?;
            columns.push((
                name.clone(),
                Slot {
                    dtype: slot.dtype,
                    len: slot.len,
                    cached: Some(handle),
                    stored: false,
                },
            ));
        }
        Ok(Table::with_source(
            &inner.session,
            None,
            inner.name.clone(),
            columns,
            inner.attributes.clone(),
        ))
    }
}

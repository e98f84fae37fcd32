//! SQLite-backed hierarchical group store.
//!
//! A store maps `/`-delimited logical paths to groups, datasets and external links. Persisted
//! container files carry a store as a serialized SQLite image behind their header region; the
//! spill cache uses a scratch store of the same shape.

use crate::codec::{CodecError, EncodedColumn, Encoding};
use crate::column::DType;
use crate::error::{Result, StorageError};
use crate::header::HeaderError;
use crate::path::{self, ROOT};
use crate::schema;
use rusqlite::{params, Connection, OptionalExtension, MAIN_DB};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A (file, internal path) pair. Also the target of an external link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: PathBuf,
    pub path: String,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, path: &str) -> Self {
        Self {
            file: file.into(),
            path: path::normalize(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group,
    Dataset { dtype: DType, len: usize },
    Link(Location),
}

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    label: PathBuf,
}

fn descendant_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

fn len_to_sql(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

impl Store {
    /// Empty writable store held in memory. `label` names it in error messages.
    pub fn open_in_memory(label: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self {
            conn,
            label: label.into(),
        })
    }

    /// Writable store in a standalone SQLite file (used for scratch space).
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        // Scratch data never needs to survive a crash.
        conn.pragma_update(None, "synchronous", "OFF")?;
        schema::init(&conn)?;
        Ok(Self {
            conn,
            label: path.to_path_buf(),
        })
    }

    /// Store over a serialized image. A non-empty image is loaded read-only; an empty image
    /// (a container persisted before anything was written) yields an empty writable store.
    pub fn from_image(label: impl Into<PathBuf>, image: &[u8]) -> Result<Self> {
        let label = label.into();
        let mut conn = Connection::open_in_memory()?;
        if image.is_empty() {
            schema::init(&conn)?;
            return Ok(Self { conn, label });
        }
        let not_a_store = || HeaderError::MalformedRegion("data region is not a group store");
        conn.deserialize_read_exact(MAIN_DB, image, image.len(), true)
            .map_err(|_| not_a_store())?;
        // A foreign image may deserialize fine and only fail once queried.
        if !schema::is_initialized(&conn).unwrap_or(false) {
            return Err(not_a_store().into());
        }
        Ok(Self { conn, label })
    }

    /// Serialize the whole store into an image suitable for [`Store::from_image`].
    pub fn image(&self) -> Result<Vec<u8>> {
        let data = self.conn.serialize(MAIN_DB)?;
        Ok(data.to_vec())
    }

    pub fn label(&self) -> &Path {
        &self.label
    }

    fn missing(&self, path: &str) -> StorageError {
        StorageError::MissingPath {
            file: self.label.clone(),
            path: path.to_string(),
        }
    }

    fn not_a_group(&self, path: &str) -> StorageError {
        StorageError::NotAGroup {
            file: self.label.clone(),
            path: path.to_string(),
        }
    }

    pub fn node(&self, path: &str) -> Result<Option<Node>> {
        let path = path::normalize(path);
        let row = self
            .conn
            .query_row(
                "SELECT kind, dtype, len, link_file, link_path FROM nodes WHERE path = ?1",
                params![path],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, Option<i64>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, dtype, len, link_file, link_path)) = row else {
            return Ok(None);
        };
        let node = match kind.as_str() {
            "group" => Node::Group,
            "dataset" => {
                let dtype = dtype.unwrap_or_default();
                Node::Dataset {
                    dtype: DType::parse(&dtype).ok_or(CodecError::UnknownDType(dtype))?,
                    len: usize::try_from(len.unwrap_or(0)).unwrap_or(0),
                }
            }
            _ => Node::Link(Location::new(
                link_file.unwrap_or_default(),
                &link_path.unwrap_or_else(|| ROOT.to_string()),
            )),
        };
        Ok(Some(node))
    }

    /// Create every missing group along `path`. Existing datasets or links on the way fail.
    pub fn create_path(&self, path: &str) -> Result<()> {
        for prefix in path::prefixes(path) {
            match self.node(&prefix)? {
                Some(Node::Group) => {}
                Some(_) => return Err(self.not_a_group(&prefix)),
                None => {
                    let (parent, name) = path::split_last(&prefix).ok_or_else(|| self.missing(&prefix))?;
                    self.conn.execute(
                        "INSERT INTO nodes (path, parent, name, kind) VALUES (?1, ?2, ?3, 'group')",
                        params![prefix, parent, path::unescape_name(name)],
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Make sure the parent group of `path` exists and return (parent, unescaped name).
    fn prepare_leaf(&self, path: &str) -> Result<(String, String)> {
        let (parent, name) = path::split_last(path).ok_or_else(|| self.not_a_group(path))?;
        self.create_path(&parent)?;
        self.remove_descendants(path)?;
        Ok((parent, path::unescape_name(name)))
    }

    pub fn put_dataset(&self, path: &str, column: &EncodedColumn) -> Result<()> {
        let path = path::normalize(path);
        let (parent, name) = self.prepare_leaf(&path)?;
        self.conn.execute(
            r#"
            INSERT INTO nodes (
              path, parent, name, kind, dtype, encoding, text_encoding, len, payload, link_file, link_path
            ) VALUES (?1, ?2, ?3, 'dataset', ?4, ?5, ?6, ?7, ?8, NULL, NULL)
            ON CONFLICT(path) DO UPDATE SET
              kind = excluded.kind,
              dtype = excluded.dtype,
              encoding = excluded.encoding,
              text_encoding = excluded.text_encoding,
              len = excluded.len,
              payload = excluded.payload,
              link_file = NULL,
              link_path = NULL
            "#,
            params![
                path,
                parent,
                name,
                column.dtype.as_str(),
                column.encoding.as_str(),
                column.text_encoding.as_deref(),
                len_to_sql(column.len),
                column.payload
            ],
        )?;
        Ok(())
    }

    pub fn read_dataset(&self, path: &str) -> Result<EncodedColumn> {
        let path = path::normalize(path);
        let row = self
            .conn
            .query_row(
                "SELECT kind, dtype, encoding, text_encoding, len, payload FROM nodes WHERE path = ?1",
                params![path],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, Option<i64>>(4)?,
                        r.get::<_, Option<Vec<u8>>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, dtype, encoding, text_encoding, len, payload)) = row else {
            return Err(self.missing(&path));
        };
        if kind != "dataset" {
            return Err(StorageError::NotADataset {
                file: self.label.clone(),
                path,
            });
        }
        let dtype = dtype.unwrap_or_default();
        Ok(EncodedColumn {
            dtype: DType::parse(&dtype).ok_or(CodecError::UnknownDType(dtype))?,
            encoding: Encoding::parse(encoding.as_deref().unwrap_or("raw"))?,
            text_encoding,
            len: usize::try_from(len.unwrap_or(0)).unwrap_or(0),
            payload: payload.unwrap_or_default(),
        })
    }

    pub fn put_link(&self, path: &str, target: &Location) -> Result<()> {
        let path = path::normalize(path);
        let (parent, name) = self.prepare_leaf(&path)?;
        self.conn.execute(
            r#"
            INSERT INTO nodes (
              path, parent, name, kind, dtype, encoding, text_encoding, len, payload, link_file, link_path
            ) VALUES (?1, ?2, ?3, 'link', NULL, NULL, NULL, NULL, NULL, ?4, ?5)
            ON CONFLICT(path) DO UPDATE SET
              kind = excluded.kind,
              dtype = NULL,
              encoding = NULL,
              text_encoding = NULL,
              len = NULL,
              payload = NULL,
              link_file = excluded.link_file,
              link_path = excluded.link_path
            "#,
            params![
                path,
                parent,
                name,
                target.file.to_string_lossy().into_owned(),
                target.path
            ],
        )?;
        Ok(())
    }

    fn remove_descendants(&self, path: &str) -> Result<()> {
        let prefix = descendant_prefix(path);
        self.conn.execute(
            "DELETE FROM nodes WHERE path != '/' AND substr(path, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        self.conn.execute(
            "DELETE FROM attributes WHERE path != '/' AND substr(path, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(())
    }

    /// Remove `path` with everything below it. Removing the root empties the store.
    /// Returns whether anything was removed.
    pub fn remove(&self, path: &str) -> Result<bool> {
        let path = path::normalize(path);
        let existed = self.node(&path)?.is_some();
        self.remove_descendants(&path)?;
        self.conn
            .execute("DELETE FROM attributes WHERE path = ?1", params![path])?;
        if path != ROOT {
            self.conn
                .execute("DELETE FROM nodes WHERE path = ?1", params![path])?;
        }
        Ok(existed)
    }

    /// Unescaped child names of the group at `path`, in creation order.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        let path = path::normalize(path);
        match self.node(&path)? {
            Some(Node::Group) => {}
            Some(_) => return Err(self.not_a_group(&path)),
            None => return Err(self.missing(&path)),
        }
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM nodes WHERE parent = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![path], |r| r.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    pub fn set_attribute(&self, path: &str, name: &str, value: &serde_json::Value) -> Result<()> {
        let path = path::normalize(path);
        if self.node(&path)?.is_none() {
            return Err(self.missing(&path));
        }
        self.conn.execute(
            r#"
            INSERT INTO attributes (path, name, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(path, name) DO UPDATE SET value = excluded.value
            "#,
            params![path, name, value],
        )?;
        Ok(())
    }

    pub fn attribute(&self, path: &str, name: &str) -> Result<Option<serde_json::Value>> {
        let path = path::normalize(path);
        let value = self
            .conn
            .query_row(
                "SELECT value FROM attributes WHERE path = ?1 AND name = ?2",
                params![path, name],
                |r| r.get::<_, serde_json::Value>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn attributes(&self, path: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        let path = path::normalize(path);
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM attributes WHERE path = ?1")?;
        let rows = stmt.query_map(params![path], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, serde_json::Value>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (name, value) = row?;
            out.insert(name, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::column::Column;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory("memory").expect("open store")
    }

    #[test]
    fn create_path_builds_intermediate_groups() {
        let store = store();
        store.create_path("/a/b/c").expect("create");
        assert_eq!(store.node("/a").expect("node"), Some(Node::Group));
        assert_eq!(store.node("/a/b/c").expect("node"), Some(Node::Group));
        assert_eq!(store.children("/").expect("children"), vec!["a"]);
    }

    #[test]
    fn datasets_round_trip_and_keep_order() {
        let store = store();
        let x = encode(&Column::from(vec![1i64, 2])).expect("encode");
        let y = encode(&Column::from(vec!["q"])).expect("encode");
        store.put_dataset("/t/x", &x).expect("put x");
        store.put_dataset(&path::join("/t", "y/z"), &y).expect("put y");
        store.put_dataset("/t/x", &x).expect("rewrite x");

        assert_eq!(store.read_dataset("/t/x").expect("read"), x);
        assert_eq!(store.children("/t").expect("children"), vec!["x", "y/z"]);
        assert_eq!(
            store.node("/t/x").expect("node"),
            Some(Node::Dataset {
                dtype: DType::Int64,
                len: 2
            })
        );
    }

    #[test]
    fn datasets_are_not_groups() {
        let store = store();
        let x = encode(&Column::from(vec![true])).expect("encode");
        store.put_dataset("/x", &x).expect("put");
        let err = store.create_path("/x/y").expect_err("dataset in the way");
        assert!(matches!(err, StorageError::NotAGroup { .. }), "{err:?}");
        let err = store.read_dataset("/missing").expect_err("missing");
        assert!(matches!(err, StorageError::MissingPath { .. }), "{err:?}");
    }

    #[test]
    fn links_replace_subtrees() {
        let store = store();
        store.create_path("/g/inner").expect("create");
        store.set_attribute("/g/inner", "k", &json!(1)).expect("attr");
        let target = Location::new("/tmp/other.sydata", "/t/x");
        store.put_link("/g", &target).expect("link");

        assert_eq!(store.node("/g").expect("node"), Some(Node::Link(target)));
        assert_eq!(store.node("/g/inner").expect("node"), None);
        assert_eq!(store.attribute("/g/inner", "k").expect("attr"), None);
    }

    #[test]
    fn remove_and_attributes() {
        let store = store();
        store.create_path("/a/b").expect("create");
        store.set_attribute("/a", "name", &json!("alpha")).expect("attr");
        store.set_attribute("/a", "rows", &json!(3)).expect("attr");
        assert_eq!(
            store.attributes("/a").expect("attrs").into_iter().collect::<Vec<_>>(),
            vec![("name".to_string(), json!("alpha")), ("rows".to_string(), json!(3))]
        );

        assert!(store.remove("/a").expect("remove"));
        assert!(!store.remove("/a").expect("remove again"));
        assert!(store.attributes("/a").expect("attrs").is_empty());
        assert!(store.children("/").expect("children").is_empty());
    }

    #[test]
    fn image_round_trip_is_read_only() {
        let store = store();
        let x = encode(&Column::from(vec![1.5f64])).expect("encode");
        store.put_dataset("/x", &x).expect("put");
        let image = store.image().expect("image");

        let copy = Store::from_image("copy", &image).expect("from image");
        assert_eq!(copy.read_dataset("/x").expect("read"), x);
        assert!(copy.put_dataset("/y", &x).is_err());

        let empty = Store::from_image("empty", &[]).expect("empty image");
        assert!(empty.children("/").expect("children").is_empty());
        empty.put_dataset("/y", &x).expect("empty image store is writable");
    }
}

use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- One row per group, dataset or external link. `parent` + `rowid` give ordered
        -- child listings; upserts keep the rowid so order survives rewrites.
        CREATE TABLE IF NOT EXISTS nodes (
          path TEXT PRIMARY KEY,
          parent TEXT,
          name TEXT,
          kind TEXT NOT NULL CHECK (kind IN ('group','dataset','link')),
          dtype TEXT,
          encoding TEXT,
          text_encoding TEXT,
          len INTEGER,
          payload BLOB,
          link_file TEXT,
          link_path TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent);

        CREATE TABLE IF NOT EXISTS attributes (
          path TEXT NOT NULL,
          name TEXT NOT NULL,
          value JSON,
          PRIMARY KEY (path, name)
        );

        INSERT OR IGNORE INTO nodes (path, parent, name, kind) VALUES ('/', NULL, NULL, 'group');
        "#,
    )?;
    Ok(())
}

/// Whether `conn` holds a store created by [`init`].
pub(crate) fn is_initialized(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('nodes', 'attributes')",
        [],
        |r| r.get(0),
    )?;
    Ok(count == 2)
}

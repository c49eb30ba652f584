//! The explicit store handle threaded through the builder and reasoner.
//!
//! Writes go through a single writer connection; concurrent heuristic output is
//! funnelled into one merge transaction per batch and every edge write is an
//! atomic upsert. Reads open their own read-only connection per request when
//! the database is file-backed, so readers never queue behind a rebuild.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{GraphError, Result};

pub struct GraphStore {
    writer: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl GraphStore {
    /// Open (or create) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = crate::db::open_database(&path)?;
        Ok(Self {
            writer: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Store over a private in-memory database. Reads share the writer.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = crate::db::open_memory_database()?;
        Ok(Self {
            writer: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against a read path.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.path {
            Some(path) => {
                let conn = crate::db::open_read_connection(path)?;
                f(&conn)
            }
            None => {
                let conn = self.lock()?;
                f(&conn)
            }
        }
    }

    /// Run `f` with exclusive access to the writer connection.
    pub fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    /// [`GraphStore::read`] on the blocking pool.
    pub async fn read_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.read(f))
            .await
            .map_err(|e| GraphError::internal(format!("read task failed: {e}")))?
    }

    /// [`GraphStore::write`] on the blocking pool.
    pub async fn write_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write(f))
            .await
            .map_err(|e| GraphError::internal(format!("write task failed: {e}")))?
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|e| GraphError::internal(format!("db lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_reads_its_own_writes() {
        let store = GraphStore::in_memory().unwrap();
        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO schema_meta (key, value) VALUES ('probe', 'yes')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        let value: String = store
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT value FROM schema_meta WHERE key = 'probe'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(value, "yes");
    }

    #[test]
    fn file_store_reads_through_separate_connection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = GraphStore::open(tmp.path().join("graph.db")).unwrap();
        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO schema_meta (key, value) VALUES ('probe', 'file')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let value: String = store
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT value FROM schema_meta WHERE key = 'probe'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(value, "file");

        // read path is read-only
        let denied = store.read(|conn| {
            conn.execute("DELETE FROM schema_meta", [])?;
            Ok(())
        });
        assert!(denied.is_err());
    }
}

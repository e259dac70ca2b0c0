//! Persistent backend
//!
//! A single-table `redb` database selected by an identity token: the token
//! names the database file, so two stores opened with the same identity see
//! the same data. `redb` serves concurrent readers against a serialized
//! writer, which satisfies the dispatcher's concurrency contract.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use redb::{Database, TableDefinition};

use crate::backend::{code, KvBackend};
use crate::{backend_error, Result};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("gridkv");

/// Durable backend keyed by an external identity token.
pub struct PersistentBackend {
    path: PathBuf,
    db: RwLock<Option<Database>>,
}

impl PersistentBackend {
    /// Create a backend whose database file is `<dir>/<identity>.redb`.
    pub fn new(identity: &str, dir: impl AsRef<Path>) -> Self {
        Self::with_path(dir.as_ref().join(format!("{identity}.redb")))
    }

    /// Create a backend over an explicit database path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: RwLock::new(None),
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn engine_code(op: &str, err: impl std::fmt::Display) -> i32 {
        log::warn!("persistent backend {op} failed: {err}");
        code::ENGINE
    }
}

impl KvBackend for PersistentBackend {
    fn open(&self) -> Result<()> {
        let mut guard = self.db.write();
        if guard.is_some() {
            return Err(backend_error!("database {:?} already open", self.path));
        }
        let db = Database::create(&self.path)
            .map_err(|e| backend_error!("cannot open database {:?}: {}", self.path, e))?;
        // Create the table up front so data-path reads never observe a
        // missing table.
        let txn = db
            .begin_write()
            .map_err(|e| backend_error!("cannot begin transaction: {}", e))?;
        txn.open_table(TABLE)
            .map_err(|e| backend_error!("cannot create table: {}", e))?;
        txn.commit()
            .map_err(|e| backend_error!("cannot commit table creation: {}", e))?;
        *guard = Some(db);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.db.write();
        if guard.take().is_none() {
            return Err(backend_error!("database {:?} not open", self.path));
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        if self.db.read().is_some() {
            return Err(backend_error!(
                "cannot destroy open database {:?}",
                self.path
            ));
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_error!("cannot remove {:?}: {}", self.path, e)),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> i32 {
        let guard = self.db.read();
        let Some(db) = guard.as_ref() else {
            return code::CLOSED;
        };
        let txn = match db.begin_write() {
            Ok(txn) => txn,
            Err(e) => return Self::engine_code("put/begin", e),
        };
        {
            let mut table = match txn.open_table(TABLE) {
                Ok(table) => table,
                Err(e) => return Self::engine_code("put/open", e),
            };
            if let Err(e) = table.insert(key, value) {
                return Self::engine_code("put/insert", e);
            };
        }
        match txn.commit() {
            Ok(()) => code::OK,
            Err(e) => Self::engine_code("put/commit", e),
        }
    }

    fn get(&self, key: &[u8], value_out: &mut [u8]) -> (i32, usize) {
        let guard = self.db.read();
        let Some(db) = guard.as_ref() else {
            return (code::CLOSED, 0);
        };
        let txn = match db.begin_read() {
            Ok(txn) => txn,
            Err(e) => return (Self::engine_code("get/begin", e), 0),
        };
        let table = match txn.open_table(TABLE) {
            Ok(table) => table,
            Err(e) => return (Self::engine_code("get/open", e), 0),
        };
        match table.get(key) {
            Ok(Some(entry)) => {
                let stored = entry.value();
                let len = stored.len().min(value_out.len());
                value_out[..len].copy_from_slice(&stored[..len]);
                (code::OK, len)
            }
            Ok(None) => (code::NOT_FOUND, 0),
            Err(e) => (Self::engine_code("get/read", e), 0),
        }
    }

    fn delete(&self, key: &[u8]) -> i32 {
        let guard = self.db.read();
        let Some(db) = guard.as_ref() else {
            return code::CLOSED;
        };
        let txn = match db.begin_write() {
            Ok(txn) => txn,
            Err(e) => return Self::engine_code("delete/begin", e),
        };
        let removed = {
            let mut table = match txn.open_table(TABLE) {
                Ok(table) => table,
                Err(e) => return Self::engine_code("delete/open", e),
            };
            let removed = match table.remove(key) {
                Ok(old) => old.is_some(),
                Err(e) => return Self::engine_code("delete/remove", e),
            };
            removed
        };
        match txn.commit() {
            Ok(()) if removed => code::OK,
            Ok(()) => code::NOT_FOUND,
            Err(e) => Self::engine_code("delete/commit", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PersistentBackend::new("trip", dir.path());

        backend.open().unwrap();
        assert_eq!(backend.put(b"key", b"durable"), code::OK);
        backend.close().unwrap();

        backend.open().unwrap();
        let mut out = [0u8; 7];
        let (rc, len) = backend.get(b"key", &mut out);
        assert_eq!((rc, len), (code::OK, 7));
        assert_eq!(&out, b"durable");
        backend.close().unwrap();
    }

    #[test]
    fn absent_key_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PersistentBackend::new("absent", dir.path());
        backend.open().unwrap();

        let mut out = [0u8; 1];
        assert_eq!(backend.get(b"nope", &mut out).0, code::NOT_FOUND);
        assert_eq!(backend.put(b"k", b"v"), code::OK);
        assert_eq!(backend.delete(b"k"), code::OK);
        assert_eq!(backend.delete(b"k"), code::NOT_FOUND);
        backend.close().unwrap();
    }

    #[test]
    fn destroy_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PersistentBackend::new("gone", dir.path());
        backend.open().unwrap();
        assert!(backend.destroy().is_err(), "destroy must require close");
        backend.close().unwrap();
        backend.destroy().unwrap();
        assert!(!backend.path().exists());
        // Destroying again is not an error.
        backend.destroy().unwrap();
    }

    #[test]
    fn closed_codes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PersistentBackend::new("closed", dir.path());
        let mut out = [0u8; 1];
        assert_eq!(backend.put(b"k", b"v"), code::CLOSED);
        assert_eq!(backend.get(b"k", &mut out).0, code::CLOSED);
        assert_eq!(backend.delete(b"k"), code::CLOSED);
        assert!(backend.close().is_err());
    }
}

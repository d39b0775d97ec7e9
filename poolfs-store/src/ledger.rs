//! SQLite-backed reference-count ledger.
//!
//! One row per live digest: `id_count(id TEXT PRIMARY KEY, count INTEGER)`,
//! count strictly positive. A decrement that reaches zero deletes the row
//! in the same transaction, so no reader of the committed state ever sees
//! a zero or negative count.

use std::fmt;
use std::path::Path;

use rusqlite::{Connection, params};

use crate::{Error, Result};

/// File name of the ledger database under the system root.
const LEDGER_FILE_NAME: &str = "file_quote_count.sqlite";

/// Table schema. A digest reaching count zero is deleted, never kept at 0.
const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS id_count (
        id    TEXT PRIMARY KEY,
        count INTEGER NOT NULL
    );
";

/// Extension trait to convert `rusqlite::Result` into `crate::Result`.
trait DbResultExt<T> {
    fn db(self) -> Result<T>;
}

impl<T> DbResultExt<T> for rusqlite::Result<T> {
    fn db(self) -> Result<T> {
        self.map_err(|e| Error::Db(e.to_string()))
    }
}

/// Reference-count ledger for content digests.
pub struct RefLedger {
    /// SQLite database connection.
    db: Connection,
}

impl fmt::Debug for RefLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefLedger")
            .field("db", &"<sqlite>")
            .finish()
    }
}

impl RefLedger {
    /// Opens (or creates) the ledger database under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let db = Connection::open(root.join(LEDGER_FILE_NAME)).db()?;
        db.execute_batch("PRAGMA journal_mode=WAL;").db()?;
        db.execute_batch(SCHEMA).db()?;
        Ok(Self { db })
    }

    /// Inserts `digest` with count 1.
    ///
    /// Fails with [`Error::CounterExists`] if a row is already present.
    pub fn create(&self, digest: &str) -> Result<()> {
        match self.db.execute(
            "INSERT INTO id_count (id, count) VALUES (?1, 1)",
            params![digest],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::CounterExists(digest.to_owned()))
            }
            Err(e) => Err(Error::Db(e.to_string())),
        }
    }

    /// Adds one reference to `digest`, creating the row if absent.
    pub fn increment(&self, digest: &str) -> Result<()> {
        let updated = self
            .db
            .execute(
                "UPDATE id_count SET count = count + 1 WHERE id = ?1",
                params![digest],
            )
            .db()?;
        if updated == 0 {
            self.create(digest)?;
        }
        Ok(())
    }

    /// Removes one reference from `digest`.
    ///
    /// The decrement and the delete-if-zero run in a single transaction;
    /// the committed state never holds a zero count. Returns `true` iff the
    /// row was deleted (the caller must then remove the blob). Fails with
    /// [`Error::CounterNotExists`] if no row exists.
    pub fn decrement(&self, digest: &str) -> Result<bool> {
        let tx = self.db.unchecked_transaction().db()?;
        let updated = tx
            .execute(
                "UPDATE id_count SET count = count - 1 WHERE id = ?1",
                params![digest],
            )
            .db()?;
        if updated == 0 {
            // Dropping the transaction rolls back.
            return Err(Error::CounterNotExists(digest.to_owned()));
        }
        let deleted = tx
            .execute(
                "DELETE FROM id_count WHERE id = ?1 AND count = 0",
                params![digest],
            )
            .db()?;
        tx.commit().db()?;
        Ok(deleted > 0)
    }

    /// Returns the current count for `digest`.
    ///
    /// Fails with [`Error::CounterNotExists`] if no row exists.
    pub fn get(&self, digest: &str) -> Result<i64> {
        match self.db.query_row(
            "SELECT count FROM id_count WHERE id = ?1",
            params![digest],
            |row| row.get(0),
        ) {
            Ok(count) => Ok(count),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(Error::CounterNotExists(digest.to_owned()))
            }
            Err(e) => Err(Error::Db(e.to_string())),
        }
    }

    /// Durability checkpoint.
    ///
    /// Individual operations autocommit; this flushes the WAL back into the
    /// main database file so a copy of the file alone is complete.
    pub fn commit(&self) -> Result<()> {
        self.db
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .db()
    }

    /// Checkpoints and tears down the connection.
    pub fn close(self) -> Result<()> {
        self.commit()?;
        self.db.close().map_err(|(_, e)| Error::Db(e.to_string()))
    }
}

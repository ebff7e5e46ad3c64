use activitybase_common::{Error, Result};
use chrono::Utc;
use rusqlite::params;

use crate::store::Dao;

/// One row of the `_migrations` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub name: String,
    /// Unix timestamp in microseconds.
    pub applied: i64,
}

impl Dao<'_> {
    /// Ledger rows, oldest first.
    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file, applied FROM _migrations ORDER BY applied ASC, file ASC")
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    name: row.get(0)?,
                    applied: row.get(1)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))
    }

    pub(crate) fn ledger_insert(&self, name: &str) -> Result<()> {
        // Keep entries strictly ordered even when two land in the same microsecond.
        let last: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(applied), 0) FROM _migrations", [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Database(format!("failed to read ledger: {e}")))?;
        let applied = Utc::now().timestamp_micros().max(last + 1);

        self.conn
            .execute(
                "INSERT INTO _migrations (file, applied) VALUES (?1, ?2)",
                params![name, applied],
            )
            .map_err(|e| Error::Database(format!("failed to record migration {name}: {e}")))?;
        Ok(())
    }

    pub(crate) fn ledger_remove(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM _migrations WHERE file = ?1", params![name])
            .map_err(|e| Error::Database(format!("failed to remove migration {name}: {e}")))?;
        Ok(())
    }
}

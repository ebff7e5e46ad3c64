use std::collections::HashMap;

use activitybase_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, error, info};

use super::MigrationList;
use crate::store::Store;

/// Applied state of a registered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    /// Unix timestamp in microseconds, `None` when pending.
    pub applied: Option<i64>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied.is_some()
    }
}

/// Applies and reverts migrations against a store, one transaction per unit.
pub struct MigrationRunner<'a> {
    store: &'a Store,
    migrations: &'a MigrationList,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(store: &'a Store, migrations: &'a MigrationList) -> Self {
        Self { store, migrations }
    }

    /// Apply every migration missing from the ledger, in name order.
    ///
    /// Stops at the first failure. Units applied before it stay applied and
    /// recorded; the failing unit leaves neither schema changes nor a ledger row.
    pub fn up(&self) -> Result<Vec<String>> {
        let applied: Vec<String> = self
            .store
            .transaction(|dao| dao.ledger_entries())?
            .into_iter()
            .map(|e| e.name)
            .collect();

        let mut newly_applied = Vec::new();
        for migration in self.migrations.items() {
            if applied.iter().any(|name| name == migration.name) {
                debug!("migration {} already applied, skipping", migration.name);
                continue;
            }

            info!("applying migration {}", migration.name);
            self.store
                .transaction(|dao| {
                    migration.apply(dao)?;
                    dao.ledger_insert(migration.name)
                })
                .map_err(|e| {
                    error!("migration {} failed: {e}", migration.name);
                    Error::Migration {
                        name: migration.name.to_string(),
                        source: Box::new(e),
                    }
                })?;
            info!("applied migration {}", migration.name);
            newly_applied.push(migration.name.to_string());
        }

        if newly_applied.is_empty() {
            info!("no pending migrations");
        }
        Ok(newly_applied)
    }

    /// Revert the `count` most recently applied migrations, newest first.
    pub fn down(&self, count: usize) -> Result<Vec<String>> {
        let entries = self.store.transaction(|dao| dao.ledger_entries())?;

        let mut reverted = Vec::new();
        for entry in entries.iter().rev().take(count) {
            let migration = self.migrations.get(&entry.name).ok_or_else(|| {
                Error::NotFound(format!("no registered migration named {}", entry.name))
            })?;

            info!("reverting migration {}", migration.name);
            self.store
                .transaction(|dao| {
                    migration.rollback(dao)?;
                    dao.ledger_remove(migration.name)
                })
                .map_err(|e| {
                    error!("reverting migration {} failed: {e}", migration.name);
                    Error::Migration {
                        name: migration.name.to_string(),
                        source: Box::new(e),
                    }
                })?;
            info!("reverted migration {}", migration.name);
            reverted.push(migration.name.to_string());
        }

        if reverted.is_empty() {
            info!("no migrations to revert");
        }
        Ok(reverted)
    }

    /// Ledger names, oldest first.
    pub fn applied(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .transaction(|dao| dao.ledger_entries())?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Every registered migration with its ledger timestamp.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let ledger: HashMap<String, i64> = self
            .store
            .transaction(|dao| dao.ledger_entries())?
            .into_iter()
            .map(|e| (e.name, e.applied))
            .collect();

        Ok(self
            .migrations
            .items()
            .iter()
            .map(|m| MigrationStatus {
                name: m.name.to_string(),
                applied: ledger.get(m.name).copied(),
            })
            .collect())
    }

    pub fn pending(&self) -> Result<Vec<String>> {
        Ok(self
            .status()?
            .into_iter()
            .filter(|s| !s.is_applied())
            .map(|s| s.name)
            .collect())
    }
}

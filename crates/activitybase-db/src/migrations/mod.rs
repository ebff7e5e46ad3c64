//! Migration system for tracking and applying collection schema changes.
//!
//! Each migration has a unique, date-prefixed name and a pair of `up` / `down`
//! functions over a [`Dao`]. Migrations are applied in name order and tracked in
//! the `_migrations` ledger table.

mod activities;
pub mod ledger;
pub mod runner;

use std::fmt;

use activitybase_common::{Error, Result};

use crate::store::Dao;

pub use activities::{ACTIVITIES, ACTIVITIES_COLLECTION, AUTHENTICATED_RULE, activities_collection};
pub use ledger::LedgerEntry;
pub use runner::{MigrationRunner, MigrationStatus};

pub type MigrationFn = fn(&Dao<'_>) -> Result<()>;

/// One reversible schema change.
#[derive(Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub up: MigrationFn,
    pub down: MigrationFn,
}

impl Migration {
    pub fn apply(&self, dao: &Dao<'_>) -> Result<()> {
        (self.up)(dao)
    }

    pub fn rollback(&self, dao: &Dao<'_>) -> Result<()> {
        (self.down)(dao)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish()
    }
}

/// Ordered set of migrations with unique names.
#[derive(Debug, Clone, Default)]
pub struct MigrationList {
    items: Vec<Migration>,
}

impl MigrationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration, rejecting a name that is already registered.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        if migration.name.is_empty() {
            return Err(Error::Validation("migration name cannot be empty".into()));
        }
        if self.get(migration.name).is_some() {
            return Err(Error::DuplicateMigration(migration.name.to_string()));
        }
        let pos = self
            .items
            .partition_point(|m| m.name < migration.name);
        self.items.insert(pos, migration);
        Ok(())
    }

    pub fn with(mut self, migration: Migration) -> Result<Self> {
        self.register(migration)?;
        Ok(self)
    }

    /// All migrations, sorted by name.
    pub fn items(&self) -> &[Migration] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.items.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The migrations this application ships with. Build once at process entry
/// and hand the list to a [`MigrationRunner`].
pub fn builtin_migrations() -> Result<MigrationList> {
    MigrationList::new().with(ACTIVITIES)
}

pub mod migrations;
pub mod records;
pub mod rules;
pub mod schema;
pub mod store;

pub use migrations::{
    Migration, MigrationList, MigrationRunner, MigrationStatus, builtin_migrations,
};
pub use records::Record;
pub use rules::{AccessRule, AccessRules, AuthRecord, RequestContext, RuleOp};
pub use schema::{
    Collection, CollectionType, DefaultGenerator, DefaultValue, FieldOptions, FieldType, Schema,
    SchemaField,
};
pub use store::{Dao, Store};

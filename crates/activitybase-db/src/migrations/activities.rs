use activitybase_common::Result;
use tracing::{info, warn};

use super::Migration;
use crate::rules::AccessRules;
use crate::schema::{Collection, Schema, SchemaField};
use crate::store::Dao;

pub const ACTIVITIES_COLLECTION: &str = "activities";

/// Only authenticated callers may touch the collection.
pub const AUTHENTICATED_RULE: &str = "@request.auth.id != ''";

pub const ACTIVITIES: Migration = Migration {
    name: "20240320_activities",
    up,
    down,
};

pub fn activities_collection() -> Result<Collection> {
    let schema = Schema::new(vec![
        SchemaField::text("title").required(),
        SchemaField::text("description"),
        SchemaField::date("date").required(),
        SchemaField::text("category").required(),
        SchemaField::number("amount"),
        SchemaField::text("status").required(),
    ])?;

    Ok(Collection::new(ACTIVITIES_COLLECTION, schema)
        .with_rules(AccessRules::all(AUTHENTICATED_RULE)))
}

fn up(dao: &Dao<'_>) -> Result<()> {
    info!("creating {ACTIVITIES_COLLECTION} collection");
    let collection = activities_collection()?;
    dao.save_collection(&collection).inspect_err(|e| {
        warn!("failed to create {ACTIVITIES_COLLECTION} collection: {e}");
    })?;
    info!("created {ACTIVITIES_COLLECTION} collection");
    Ok(())
}

fn down(dao: &Dao<'_>) -> Result<()> {
    info!("deleting {ACTIVITIES_COLLECTION} collection");
    let collection = dao
        .find_collection_by_name_or_id(ACTIVITIES_COLLECTION)
        .inspect_err(|e| warn!("failed to find collection for rollback: {e}"))?;
    dao.delete_collection(&collection)
        .inspect_err(|e| warn!("failed to delete collection during rollback: {e}"))?;
    info!("deleted {ACTIVITIES_COLLECTION} collection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use activitybase_common::Error;
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::rules::{AuthRecord, RequestContext, RuleOp};
    use crate::schema::FieldType;
    use crate::store::Store;

    fn fields(collection: &Collection) -> Vec<(String, FieldType, bool)> {
        collection
            .schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.field_type, f.required))
            .collect()
    }

    #[test]
    fn apply_creates_collection_with_declared_schema_and_rules() {
        let store = Store::in_memory().unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();

        let collection = store
            .transaction(|dao| dao.find_collection_by_name_or_id(ACTIVITIES_COLLECTION))
            .unwrap();
        assert_eq!(
            fields(&collection),
            vec![
                ("title".to_string(), FieldType::Text, true),
                ("description".to_string(), FieldType::Text, false),
                ("date".to_string(), FieldType::Date, true),
                ("category".to_string(), FieldType::Text, true),
                ("amount".to_string(), FieldType::Number, false),
                ("status".to_string(), FieldType::Text, true),
            ]
        );
        for op in [
            RuleOp::List,
            RuleOp::View,
            RuleOp::Create,
            RuleOp::Update,
            RuleOp::Delete,
        ] {
            assert_eq!(
                collection.rules.rule(op).expression(),
                Some(AUTHENTICATED_RULE)
            );
        }
    }

    #[test]
    fn second_apply_fails_and_leaves_store_unchanged() {
        let store = Store::in_memory().unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();
        let before = store.transaction(|dao| dao.list_collections()).unwrap();

        let err = store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let after = store.transaction(|dao| dao.list_collections()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn rollback_removes_collection_then_reports_not_found() {
        let store = Store::in_memory().unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();
        store.transaction(|dao| ACTIVITIES.rollback(dao)).unwrap();

        assert!(
            !store
                .transaction(|dao| dao.collection_exists(ACTIVITIES_COLLECTION))
                .unwrap()
        );
        let err = store.transaction(|dao| ACTIVITIES.rollback(dao)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn reapply_after_rollback_reproduces_schema_but_not_records() {
        let store = Store::in_memory().unwrap();
        let user = RequestContext::authenticated(AuthRecord::new("u1"));
        let mut input = Map::new();
        input.insert("title".into(), json!("Groceries"));
        input.insert("date".into(), json!("2024-03-20"));
        input.insert("category".into(), json!("food"));
        input.insert("status".into(), json!("done"));

        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();
        let first = store
            .transaction(|dao| dao.find_collection_by_name_or_id(ACTIVITIES_COLLECTION))
            .unwrap();
        store
            .transaction(|dao| dao.insert_record(ACTIVITIES_COLLECTION, &user, &input))
            .unwrap();

        store.transaction(|dao| ACTIVITIES.rollback(dao)).unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();

        let second = store
            .transaction(|dao| dao.find_collection_by_name_or_id(ACTIVITIES_COLLECTION))
            .unwrap();
        assert_eq!(first.schema, second.schema);
        assert_eq!(first.rules, second.rules);
        assert_eq!(
            store
                .transaction(|dao| dao.count_records(ACTIVITIES_COLLECTION))
                .unwrap(),
            0
        );
    }

    #[test]
    fn authenticated_crud_allowed_anonymous_rejected() {
        let store = Store::in_memory().unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();

        let mut input = Map::new();
        input.insert("title".into(), json!("Rent"));
        input.insert("date".into(), json!("2024-03-01 09:00:00"));
        input.insert("category".into(), json!("housing"));
        input.insert("amount".into(), json!(1200.5));
        input.insert("status".into(), json!("paid"));

        let anon = RequestContext::anonymous();
        let err = store
            .transaction(|dao| dao.insert_record(ACTIVITIES_COLLECTION, &anon, &input))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let user = RequestContext::authenticated(AuthRecord::new("u1"));
        let record = store
            .transaction(|dao| dao.insert_record(ACTIVITIES_COLLECTION, &user, &input))
            .unwrap();
        assert_eq!(record.get("description"), Some(&Value::Null));
        assert_eq!(record.get("date"), Some(&json!("2024-03-01 09:00:00.000Z")));

        for result in [
            store
                .transaction(|dao| dao.list_records(ACTIVITIES_COLLECTION, &anon))
                .map(|_| ()),
            store
                .transaction(|dao| dao.get_record(ACTIVITIES_COLLECTION, &anon, &record.id))
                .map(|_| ()),
            store.transaction(|dao| dao.delete_record(ACTIVITIES_COLLECTION, &anon, &record.id)),
            store
                .transaction(|dao| {
                    dao.update_record(ACTIVITIES_COLLECTION, &anon, &record.id, &input)
                })
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(Error::Unauthorized(_))));
        }

        let mut patch = Map::new();
        patch.insert("status".into(), json!("refunded"));
        patch.insert("amount".into(), json!(1200));
        let updated = store
            .transaction(|dao| dao.update_record(ACTIVITIES_COLLECTION, &user, &record.id, &patch))
            .unwrap();
        assert_eq!(updated.get("status"), Some(&json!("refunded")));
        assert_eq!(updated.get("title"), Some(&json!("Rent")));

        let err = store
            .transaction(|dao| dao.update_record(ACTIVITIES_COLLECTION, &user, "missing", &patch))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let listed = store
            .transaction(|dao| dao.list_records(ACTIVITIES_COLLECTION, &user))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], updated);
        assert_eq!(listed[0].get("amount"), Some(&json!(1200.0)));
        store
            .transaction(|dao| dao.delete_record(ACTIVITIES_COLLECTION, &user, &record.id))
            .unwrap();
    }

    #[test]
    fn record_ids_come_from_the_default_generator() {
        let store = Store::in_memory().unwrap();
        store.transaction(|dao| ACTIVITIES.apply(dao)).unwrap();
        let user = RequestContext::authenticated(AuthRecord::new("u1"));
        let input: Map<String, Value> = serde_json::from_value(json!({
            "title": "a", "date": "2024-01-01", "category": "c", "status": "s"
        }))
        .unwrap();

        let a = store
            .transaction(|dao| dao.insert_record(ACTIVITIES_COLLECTION, &user, &input))
            .unwrap();
        let b = store
            .transaction(|dao| dao.insert_record(ACTIVITIES_COLLECTION, &user, &input))
            .unwrap();
        assert_eq!(a.id.len(), crate::schema::ID_LENGTH);
        assert_ne!(a.id, b.id);
    }
}

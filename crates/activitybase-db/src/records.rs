use activitybase_common::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{ErrorCode, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::rules::{RequestContext, RuleOp};
use crate::schema::{Collection, DefaultGenerator, DefaultValue, FieldType, ID_LENGTH, now_string};
use crate::store::Dao;

/// A stored row of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub collection_id: String,
    pub collection_name: String,
    pub created: String,
    pub updated: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

impl Dao<'_> {
    /// Validate `data` against the collection schema and insert it.
    pub fn insert_record(
        &self,
        collection: &str,
        ctx: &RequestContext,
        data: &Map<String, Value>,
    ) -> Result<Record> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        self.authorize(&collection, RuleOp::Create, ctx)?;

        let id = match data.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {
                validate_record_id(id)?;
                id.to_string()
            }
            _ => match (DefaultValue::RandomId { length: ID_LENGTH }).generate() {
                Value::String(id) => id,
                other => other.to_string(),
            },
        };

        let mut columns = vec!["[id]".to_string()];
        let mut values = vec![SqlValue::Text(id.clone())];
        for field in collection.schema.fields() {
            let value = field.prepare(data.get(&field.name))?;
            columns.push(format!("[{}]", field.name));
            values.push(to_sql(field.field_type, &value));
        }

        let now = now_string();
        columns.push("[created]".to_string());
        columns.push("[updated]".to_string());
        values.push(SqlValue::Text(now.clone()));
        values.push(SqlValue::Text(now));

        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute(
                &format!(
                    "INSERT INTO [{}] ({}) VALUES ({placeholders})",
                    collection.name,
                    columns.join(", ")
                ),
                params_from_iter(values),
            )
            .map_err(|e| write_error(&collection, "insert", e))?;

        self.fetch_record(&collection, &id)?
            .ok_or_else(|| Error::Database(format!("record '{id}' vanished after insert")))
    }

    pub fn get_record(&self, collection: &str, ctx: &RequestContext, id: &str) -> Result<Record> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        self.authorize(&collection, RuleOp::View, ctx)?;

        self.fetch_record(&collection, id)?
            .ok_or_else(|| Error::NotFound(format!("record '{id}' in '{}'", collection.name)))
    }

    /// Validate the fields present in `data` and write them over the stored
    /// record. Fields missing from `data` keep their stored value.
    pub fn update_record(
        &self,
        collection: &str,
        ctx: &RequestContext,
        id: &str,
        data: &Map<String, Value>,
    ) -> Result<Record> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        self.authorize(&collection, RuleOp::Update, ctx)?;

        let existing = self
            .fetch_record(&collection, id)?
            .ok_or_else(|| Error::NotFound(format!("record '{id}' in '{}'", collection.name)))?;

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for field in collection.schema.fields() {
            let value = match data.get(&field.name) {
                Some(given) => field.prepare(Some(given))?,
                None => field.prepare(existing.get(&field.name))?,
            };
            values.push(to_sql(field.field_type, &value));
            assignments.push(format!("[{}] = ?{}", field.name, values.len()));
        }
        values.push(SqlValue::Text(now_string()));
        assignments.push(format!("[updated] = ?{}", values.len()));
        values.push(SqlValue::Text(existing.id.clone()));

        self.conn
            .execute(
                &format!(
                    "UPDATE [{}] SET {} WHERE [id] = ?{}",
                    collection.name,
                    assignments.join(", "),
                    values.len()
                ),
                params_from_iter(values),
            )
            .map_err(|e| write_error(&collection, "update", e))?;

        self.fetch_record(&collection, id)?
            .ok_or_else(|| Error::NotFound(format!("record '{id}' in '{}'", collection.name)))
    }

    pub fn list_records(&self, collection: &str, ctx: &RequestContext) -> Result<Vec<Record>> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        self.authorize(&collection, RuleOp::List, ctx)?;

        let sql = format!("{} ORDER BY [created] ASC, rowid ASC", select_sql(&collection));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| read_record(&collection, row))
            .map_err(|e| Error::Database(format!("failed to query records: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read record row: {e}")))
    }

    pub fn delete_record(&self, collection: &str, ctx: &RequestContext, id: &str) -> Result<()> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        self.authorize(&collection, RuleOp::Delete, ctx)?;

        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM [{}] WHERE [id] = ?1", collection.name),
                params![id],
            )
            .map_err(|e| Error::Database(format!("failed to delete record: {e}")))?;
        if removed == 0 {
            return Err(Error::NotFound(format!(
                "record '{id}' in '{}'",
                collection.name
            )));
        }
        Ok(())
    }

    fn fetch_record(&self, collection: &Collection, id: &str) -> Result<Option<Record>> {
        let sql = format!("{} WHERE [id] = ?1", select_sql(collection));
        self.conn
            .query_row(&sql, params![id], |row| read_record(collection, row))
            .optional()
            .map_err(|e| Error::Database(format!("failed to query record: {e}")))
    }

    /// Row count without rule checks.
    pub fn count_records(&self, collection: &str) -> Result<usize> {
        let collection = self.find_collection_by_name_or_id(collection)?;
        let count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM [{}]", collection.name),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count records: {e}")))?;
        Ok(count as usize)
    }
}

fn write_error(collection: &Collection, action: &str, e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => Error::Validation(format!(
            "record violates a unique constraint on '{}': {e}",
            collection.name
        )),
        _ => Error::Database(format!("failed to {action} record: {e}")),
    }
}

fn validate_record_id(id: &str) -> Result<()> {
    let valid = id.len() <= ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "record id '{id}' must be at most {ID_LENGTH} lowercase alphanumeric characters"
        )))
    }
}

fn select_sql(collection: &Collection) -> String {
    let mut columns = vec!["[id]".to_string(), "[created]".to_string(), "[updated]".to_string()];
    columns.extend(
        collection
            .schema
            .fields()
            .iter()
            .map(|f| format!("[{}]", f.name)),
    );
    format!("SELECT {} FROM [{}]", columns.join(", "), collection.name)
}

fn read_record(collection: &Collection, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let mut data = Map::new();
    for (i, field) in collection.schema.fields().iter().enumerate() {
        let raw: SqlValue = row.get(i + 3)?;
        data.insert(field.name.clone(), from_sql(field.field_type, raw));
    }
    Ok(Record {
        id: row.get(0)?,
        collection_id: collection.id.clone(),
        collection_name: collection.name.clone(),
        created: row.get(1)?,
        updated: row.get(2)?,
        data,
    })
}

fn to_sql(field_type: FieldType, value: &Value) -> SqlValue {
    match (field_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (FieldType::Json, v) => SqlValue::Text(v.to_string()),
        (_, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, v) => SqlValue::Text(v.to_string()),
    }
}

fn from_sql(field_type: FieldType, raw: SqlValue) -> Value {
    match (field_type, raw) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (FieldType::Json, SqlValue::Text(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, SqlValue::Integer(i)) => Value::Number(i.into()),
        (_, SqlValue::Real(f)) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Blob(_)) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rules::{AccessRules, AuthRecord};
    use crate::schema::{Schema, SchemaField};
    use crate::store::Store;

    fn store_with_tasks() -> Store {
        let store = Store::in_memory().unwrap();
        let collection = Collection::new(
            "tasks",
            Schema::new(vec![
                SchemaField::text("title").required(),
                SchemaField::text("code").unique(),
                SchemaField::number("estimate"),
                SchemaField::new("done", FieldType::Bool),
                SchemaField::new("meta", FieldType::Json),
            ])
            .unwrap(),
        )
        .with_rules(AccessRules::all("@request.auth.id != ''"));
        store.transaction(|dao| dao.save_collection(&collection)).unwrap();
        store
    }

    fn user() -> RequestContext {
        RequestContext::authenticated(AuthRecord::new("user1"))
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = store_with_tasks();
        let input = data(json!({
            "title": "Write report",
            "estimate": 2.5,
            "done": true,
            "meta": {"tags": ["a"]},
        }));
        let record = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &input))
            .unwrap();
        assert_eq!(record.id.len(), ID_LENGTH);

        let fetched = store
            .transaction(|dao| dao.get_record("tasks", &user(), &record.id))
            .unwrap();
        assert_eq!(fetched.get("title"), Some(&json!("Write report")));
        assert_eq!(fetched.get("estimate"), Some(&json!(2.5)));
        assert_eq!(fetched.get("done"), Some(&json!(true)));
        assert_eq!(fetched.get("meta"), Some(&json!({"tags": ["a"]})));
        assert_eq!(fetched.get("code"), Some(&Value::Null));
    }

    #[test]
    fn inserted_record_matches_what_is_read_back() {
        let store = store_with_tasks();
        let input = data(json!({ "title": "Whole", "estimate": 3, "done": false }));
        let inserted = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &input))
            .unwrap();
        let fetched = store
            .transaction(|dao| dao.get_record("tasks", &user(), &inserted.id))
            .unwrap();
        assert_eq!(inserted, fetched);
        assert_eq!(fetched.get("estimate"), Some(&json!(3.0)));
    }

    #[test]
    fn update_merges_given_fields_over_stored_ones() {
        let store = store_with_tasks();
        let input = data(json!({ "title": "Draft", "code": "T-1", "estimate": 1 }));
        let record = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &input))
            .unwrap();

        let patch = data(json!({ "title": "Final", "done": true }));
        let updated = store
            .transaction(|dao| dao.update_record("tasks", &user(), &record.id, &patch))
            .unwrap();
        assert_eq!(updated.id, record.id);
        assert_eq!(updated.created, record.created);
        assert!(updated.updated >= record.updated);
        assert_eq!(updated.get("title"), Some(&json!("Final")));
        assert_eq!(updated.get("done"), Some(&json!(true)));
        assert_eq!(updated.get("code"), Some(&json!("T-1")));
        assert_eq!(updated.get("estimate"), Some(&json!(1.0)));

        let fetched = store
            .transaction(|dao| dao.get_record("tasks", &user(), &record.id))
            .unwrap();
        assert_eq!(fetched, updated);
    }

    #[test]
    fn update_is_rule_checked_and_validated() {
        let store = store_with_tasks();
        let first = store
            .transaction(|dao| {
                dao.insert_record("tasks", &user(), &data(json!({ "title": "a", "code": "A" })))
            })
            .unwrap();
        store
            .transaction(|dao| {
                dao.insert_record("tasks", &user(), &data(json!({ "title": "b", "code": "B" })))
            })
            .unwrap();

        let patch = data(json!({ "title": "changed" }));
        let err = store
            .transaction(|dao| {
                dao.update_record("tasks", &RequestContext::anonymous(), &first.id, &patch)
            })
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let err = store
            .transaction(|dao| {
                dao.update_record("tasks", &user(), &first.id, &data(json!({ "title": "" })))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .transaction(|dao| {
                dao.update_record("tasks", &user(), &first.id, &data(json!({ "code": "B" })))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .transaction(|dao| dao.update_record("tasks", &user(), "missing", &patch))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let unchanged = store
            .transaction(|dao| dao.get_record("tasks", &user(), &first.id))
            .unwrap();
        assert_eq!(unchanged.get("title"), Some(&json!("a")));
    }

    #[test]
    fn anonymous_requests_are_rejected() {
        let store = store_with_tasks();
        let anon = RequestContext::anonymous();
        let input = data(json!({ "title": "x" }));

        let err = store
            .transaction(|dao| dao.insert_record("tasks", &anon, &input))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let err = store
            .transaction(|dao| dao.list_records("tasks", &anon))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(store.transaction(|dao| dao.count_records("tasks")).unwrap(), 0);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let store = store_with_tasks();
        let err = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &data(json!({}))))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unique_field_rejects_duplicates() {
        let store = store_with_tasks();
        let input = data(json!({ "title": "a", "code": "T-1" }));
        store
            .transaction(|dao| dao.insert_record("tasks", &user(), &input))
            .unwrap();
        let err = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &input))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.transaction(|dao| dao.count_records("tasks")).unwrap(), 1);
    }

    #[test]
    fn explicit_id_is_validated() {
        let store = store_with_tasks();
        let ok = data(json!({ "id": "abc123", "title": "a" }));
        let record = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &ok))
            .unwrap();
        assert_eq!(record.id, "abc123");

        let bad = data(json!({ "id": "Not-Valid", "title": "a" }));
        assert!(
            store
                .transaction(|dao| dao.insert_record("tasks", &user(), &bad))
                .is_err()
        );
    }

    #[test]
    fn list_and_delete() {
        let store = store_with_tasks();
        for title in ["one", "two", "three"] {
            store
                .transaction(|dao| {
                    dao.insert_record("tasks", &user(), &data(json!({ "title": title })))
                })
                .unwrap();
        }
        let records = store
            .transaction(|dao| dao.list_records("tasks", &user()))
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("title"), Some(&json!("one")));

        let id = records[1].id.clone();
        store
            .transaction(|dao| dao.delete_record("tasks", &user(), &id))
            .unwrap();
        let err = store
            .transaction(|dao| dao.delete_record("tasks", &user(), &id))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn record_serializes_flat() {
        let store = store_with_tasks();
        let record = store
            .transaction(|dao| dao.insert_record("tasks", &user(), &data(json!({ "title": "a" }))))
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["collectionName"], "tasks");
        assert_eq!(json["title"], "a");
    }
}

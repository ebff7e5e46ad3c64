use std::sync::LazyLock;

use activitybase_common::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::AccessRules;

/// Length of generated collection and record ids.
pub const ID_LENGTH: usize = 15;

/// Field names the store manages on every collection, or emits next to the
/// record data. Compared without regard to ASCII case, like SQLite columns.
pub const SYSTEM_FIELDS: [&str; 5] = [
    "id",
    "created",
    "updated",
    "collectionId",
    "collectionName",
];

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Datetime layout used for `date` fields and system timestamps.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

static FIELD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
static COLLECTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_]*$").expect("valid regex"));

/// Generate a random lowercase alphanumeric identifier.
pub fn random_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

pub fn now_string() -> String {
    Utc::now().format(DATETIME_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    Date,
    Email,
    Url,
    Json,
}

impl FieldType {
    /// SQLite column affinity backing this field.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Number => "REAL",
            FieldType::Bool => "BOOLEAN",
            _ => "TEXT",
        }
    }
}

/// Type-specific constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldOptions {
    #[default]
    None,
    Text {
        min: Option<usize>,
        max: Option<usize>,
        pattern: Option<String>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
}

/// Produces a value for a field that was left blank on insert.
pub trait DefaultGenerator {
    fn generate(&self) -> Value;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultValue {
    RandomId { length: usize },
    Literal { value: Value },
    Now,
}

impl DefaultGenerator for DefaultValue {
    fn generate(&self) -> Value {
        match self {
            DefaultValue::RandomId { length } => Value::String(random_id(*length)),
            DefaultValue::Literal { value } => value.clone(),
            DefaultValue::Now => Value::String(now_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub options: FieldOptions,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            default: None,
            options: FieldOptions::None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    fn check_definition(&self) -> Result<()> {
        if !FIELD_NAME_RE.is_match(&self.name) {
            return Err(Error::Validation(format!(
                "invalid field name '{}'",
                self.name
            )));
        }
        if SYSTEM_FIELDS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&self.name))
        {
            return Err(Error::Validation(format!(
                "field name '{}' is reserved",
                self.name
            )));
        }
        match (&self.options, self.field_type) {
            (FieldOptions::None, _) => {}
            (FieldOptions::Text { pattern, min, max }, FieldType::Text) => {
                if let (Some(min), Some(max)) = (min, max)
                    && min > max
                {
                    return Err(Error::Validation(format!(
                        "field '{}': min length exceeds max length",
                        self.name
                    )));
                }
                if let Some(pattern) = pattern {
                    Regex::new(pattern).map_err(|e| {
                        Error::Validation(format!("field '{}': bad pattern: {e}", self.name))
                    })?;
                }
            }
            (FieldOptions::Number { .. }, FieldType::Number) => {}
            _ => {
                return Err(Error::Validation(format!(
                    "field '{}': options do not match type {:?}",
                    self.name, self.field_type
                )));
            }
        }
        Ok(())
    }

    /// Apply the default and validate `value`, returning the normalized value
    /// to persist. Blank optional values come back as `Value::Null`.
    pub fn prepare(&self, value: Option<&Value>) -> Result<Value> {
        let value = match value {
            Some(v) if !is_blank(v) => v.clone(),
            _ => match &self.default {
                Some(default) => default.generate(),
                None => Value::Null,
            },
        };

        if is_blank(&value) {
            if self.required {
                return Err(Error::Validation(format!(
                    "field '{}' is required",
                    self.name
                )));
            }
            return Ok(Value::Null);
        }

        match self.field_type {
            FieldType::Text => {
                let s = self.expect_str(&value)?;
                if let FieldOptions::Text { min, max, pattern } = &self.options {
                    let len = s.chars().count();
                    if let Some(min) = min
                        && len < *min
                    {
                        return Err(self.invalid(format!("must be at least {min} characters")));
                    }
                    if let Some(max) = max
                        && len > *max
                    {
                        return Err(self.invalid(format!("must be at most {max} characters")));
                    }
                    if let Some(pattern) = pattern {
                        let re = Regex::new(pattern)
                            .map_err(|e| self.invalid(format!("bad pattern: {e}")))?;
                        if !re.is_match(s) {
                            return Err(self.invalid(format!("does not match {pattern}")));
                        }
                    }
                }
                Ok(value)
            }
            FieldType::Number => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| self.invalid("must be a number".into()))?;
                if let FieldOptions::Number { min, max } = &self.options {
                    if let Some(min) = min
                        && n < *min
                    {
                        return Err(self.invalid(format!("must be >= {min}")));
                    }
                    if let Some(max) = max
                        && n > *max
                    {
                        return Err(self.invalid(format!("must be <= {max}")));
                    }
                }
                Ok(value)
            }
            FieldType::Bool => match value {
                Value::Bool(_) => Ok(value),
                _ => Err(self.invalid("must be a boolean".into())),
            },
            FieldType::Date => {
                let s = self.expect_str(&value)?;
                let parsed = parse_datetime(s)
                    .ok_or_else(|| self.invalid(format!("'{s}' is not a valid date")))?;
                Ok(Value::String(parsed.format(DATETIME_FORMAT).to_string()))
            }
            FieldType::Email => {
                let s = self.expect_str(&value)?;
                match s.split_once('@') {
                    Some((local, domain))
                        if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
                    {
                        Ok(value)
                    }
                    _ => Err(self.invalid(format!("'{s}' is not a valid email"))),
                }
            }
            FieldType::Url => {
                let s = self.expect_str(&value)?;
                let parsed =
                    url::Url::parse(s).map_err(|e| self.invalid(format!("bad url: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(self.invalid(format!("unsupported url scheme {}", parsed.scheme())));
                }
                Ok(value)
            }
            FieldType::Json => Ok(value),
        }
    }

    fn expect_str<'a>(&self, value: &'a Value) -> Result<&'a str> {
        value
            .as_str()
            .ok_or_else(|| self.invalid("must be a string".into()))
    }

    fn invalid(&self, msg: String) -> Error {
        Error::Validation(format!("field '{}' {msg}", self.name))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff][Z]` and bare `YYYY-MM-DD`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = s.trim_end_matches('Z');
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Ordered field list of a collection. Field names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Vec<SchemaField>);

impl Schema {
    pub fn new(fields: Vec<SchemaField>) -> Result<Self> {
        let schema = Self(fields);
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, field) in self.0.iter().enumerate() {
            field.check_definition()?;
            if self.0[..i]
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&field.name))
            {
                return Err(Error::Validation(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.0
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.0.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    #[default]
    Base,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionType::Base => "base",
        }
    }
}

/// A named, schema-typed group of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    pub rules: AccessRules,
    pub schema: Schema,
}

impl Collection {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: random_id(ID_LENGTH),
            name: name.into(),
            kind: CollectionType::Base,
            rules: AccessRules::default(),
            schema,
        }
    }

    pub fn with_rules(mut self, rules: AccessRules) -> Self {
        self.rules = rules;
        self
    }

    /// Check the name, field list and rule syntax before the collection is persisted.
    pub fn validate(&self) -> Result<()> {
        if !COLLECTION_NAME_RE.is_match(&self.name) {
            return Err(Error::Validation(format!(
                "invalid collection name '{}'",
                self.name
            )));
        }
        if self.id.is_empty() {
            return Err(Error::Validation("collection id cannot be empty".into()));
        }
        self.schema.validate()?;
        self.rules.validate()
    }
}

//! Catalog records.

use crate::time::{parse_timestamp, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known field names of the catalog schema.
pub mod fields {
    /// Globally unique record identifier.
    pub const ID: &str = "id";
    /// Dataset lineage identity shared by every version.
    pub const MASTER_ID: &str = "master_id";
    /// Version-qualified instance identifier.
    pub const INSTANCE_ID: &str = "instance_id";
    /// Parent dataset of a file or aggregation.
    pub const DATASET_ID: &str = "dataset_id";
    /// Integer dataset version.
    pub const VERSION: &str = "version";
    /// Whether the record is a mirrored copy.
    pub const REPLICA: &str = "replica";
    /// Whether the record is the visible version of its lineage.
    pub const LATEST: &str = "latest";
    /// Project the dataset belongs to.
    pub const PROJECT: &str = "project";
    /// Node that published the record.
    pub const INDEX_NODE: &str = "index_node";
    /// Default ordering key.
    pub const TIMESTAMP: &str = "_timestamp";
    /// Store-managed optimistic concurrency marker.
    pub const CONFLICT_VERSION: &str = "_version_";
}

/// A catalog document: field name mapped to a scalar or a list of scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns the raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Removes a field and returns its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns true if the field is present.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Mutably borrows the underlying JSON object.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Consumes the record and returns the JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Returns every value of a field: a scalar as a single element, a list as-is.
    pub fn values(&self, field: &str) -> Vec<Value> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        }
    }

    /// Returns the first value of a field rendered as text.
    pub fn first_text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::Array(items) => items.first().and_then(scalar_text),
            other => scalar_text(other),
        }
    }

    /// Record identifier.
    pub fn id(&self) -> Option<String> {
        self.first_text(fields::ID)
    }

    /// Lineage identifier.
    pub fn master_id(&self) -> Option<String> {
        self.first_text(fields::MASTER_ID)
    }

    /// Parent dataset identifier.
    pub fn dataset_id(&self) -> Option<String> {
        self.first_text(fields::DATASET_ID)
    }

    /// Dataset version, accepting numeric or textual encodings.
    pub fn version(&self) -> Option<i64> {
        self.first_text(fields::VERSION)
            .and_then(|text| text.trim().parse::<i64>().ok())
    }

    /// Reads a boolean flag, accepting `true`/`false` strings.
    pub fn flag(&self, field: &str) -> Option<bool> {
        match self.first_text(field)?.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Whether the record is a replica.
    pub fn replica(&self) -> Option<bool> {
        self.flag(fields::REPLICA)
    }

    /// Whether the record is the latest version.
    pub fn latest(&self) -> Option<bool> {
        self.flag(fields::LATEST)
    }

    /// Ordering key stored under `field`.
    pub fn timestamp(&self, field: &str) -> Option<Timestamp> {
        self.first_text(field)
            .and_then(|text| parse_timestamp(&text).ok())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

/// Renders a scalar JSON value as text. Lists and objects have no scalar form.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Record {
        Record::new()
            .with(fields::ID, "cmip5.output1.v2|node.example.org")
            .with(fields::MASTER_ID, "cmip5.output1")
            .with(fields::VERSION, "2")
            .with(fields::REPLICA, true)
            .with(fields::LATEST, json!(["true"]))
            .with(fields::TIMESTAMP, "2019-05-03T10:00:00.123Z")
    }

    #[test]
    fn typed_accessors() {
        let record = dataset();
        assert_eq!(record.id().unwrap(), "cmip5.output1.v2|node.example.org");
        assert_eq!(record.master_id().unwrap(), "cmip5.output1");
        assert_eq!(record.version(), Some(2));
        assert_eq!(record.replica(), Some(true));
        assert_eq!(record.latest(), Some(true));
        assert!(record.dataset_id().is_none());
        assert!(record.timestamp(fields::TIMESTAMP).is_some());
    }

    #[test]
    fn numeric_version() {
        let record = Record::new().with(fields::VERSION, 20190503);
        assert_eq!(record.version(), Some(20190503));
    }

    #[test]
    fn values_normalizes_shapes() {
        let record = Record::new()
            .with("variable", json!(["tas", "pr"]))
            .with("realm", "atmos")
            .with("empty", Value::Null);
        assert_eq!(record.values("variable").len(), 2);
        assert_eq!(record.values("realm"), vec![json!("atmos")]);
        assert!(record.values("empty").is_empty());
        assert!(record.values("missing").is_empty());
    }

    #[test]
    fn serializes_as_plain_object() {
        let record = Record::new().with("id", "a");
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"id":"a"}"#);
    }
}

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const NAME_FIELD: &str = "Name";
pub const IPV4_FIELD: &str = "IPv4";

/// Trait for any struct stored in a table with a composite (partition, sort) key.
pub trait DynamoModel: Send + Sync {
    const PARTITION_KEY: &'static str = "pk";
    const SORT_KEY: &'static str = "sk";

    fn partition_sort_key(&self) -> (String, String);
}

/// One row per (device name, IPv4) pair.
///
/// A device that reports a new address gets a new row; the row for its old
/// address is left in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub pk: String,
    pub sk: String,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "IPv4", default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    /// Attributes written by someone else; carried through an upsert untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CheckinRecord {
    pub fn empty(name: &str, ipv4: &str) -> Self {
        Self {
            pk: name.to_string(),
            sk: ipv4.to_string(),
            name: None,
            ipv4: None,
            extra: Map::new(),
        }
    }

    pub fn assign(&mut self, fields: &CheckinFields) {
        self.name = Some(fields.name.clone());
        self.ipv4 = Some(fields.ipv4.clone());
    }
}

impl DynamoModel for CheckinRecord {
    fn partition_sort_key(&self) -> (String, String) {
        (self.pk.clone(), self.sk.clone())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("body is not a JSON object")]
    NotAnObject,
    #[error("missing '{0}' property")]
    Missing(&'static str),
    #[error("'{0}' property is not a string")]
    WrongType(&'static str),
}

/// The identity a device reports on check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinFields {
    pub name: String,
    pub ipv4: String,
}

impl CheckinFields {
    pub fn from_json(body: &Value) -> Result<Self, FieldError> {
        let object = body.as_object().ok_or(FieldError::NotAnObject)?;

        Ok(Self {
            name: string_field(object, NAME_FIELD)?,
            ipv4: string_field(object, IPV4_FIELD)?,
        })
    }
}

fn string_field(object: &Map<String, Value>, field: &'static str) -> Result<String, FieldError> {
    match object.get(field) {
        None => Err(FieldError::Missing(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FieldError::WrongType(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_both_fields() {
        let fields =
            CheckinFields::from_json(&json!({"Name": "sensor-1", "IPv4": "10.0.0.5"})).unwrap();
        assert_eq!(fields.name, "sensor-1");
        assert_eq!(fields.ipv4, "10.0.0.5");
    }

    #[test]
    fn ignores_unrelated_properties() {
        let body = json!({"Name": "a", "IPv4": "1.2.3.4", "Uptime": 42});
        assert!(CheckinFields::from_json(&body).is_ok());
    }

    #[test]
    fn reports_first_missing_field() {
        assert_eq!(
            CheckinFields::from_json(&json!({"IPv4": "10.0.0.5"})),
            Err(FieldError::Missing("Name"))
        );
        assert_eq!(
            CheckinFields::from_json(&json!({"Name": "sensor-1"})),
            Err(FieldError::Missing("IPv4"))
        );
    }

    #[test]
    fn field_names_are_case_sensitive() {
        assert_eq!(
            CheckinFields::from_json(&json!({"DeviceName": "x", "ipv4": "1.1.1.1"})),
            Err(FieldError::Missing("Name"))
        );
    }

    #[test]
    fn rejects_non_string_values() {
        assert_eq!(
            CheckinFields::from_json(&json!({"Name": 7, "IPv4": "10.0.0.5"})),
            Err(FieldError::WrongType("Name"))
        );
        assert_eq!(
            CheckinFields::from_json(&json!({"Name": "sensor-1", "IPv4": null})),
            Err(FieldError::WrongType("IPv4"))
        );
    }

    #[test]
    fn rejects_non_object_root() {
        assert_eq!(
            CheckinFields::from_json(&json!(["sensor-1", "10.0.0.5"])),
            Err(FieldError::NotAnObject)
        );
    }

    #[test]
    fn record_keeps_foreign_attributes() {
        let stored = json!({
            "pk": "sensor-1",
            "sk": "10.0.0.5",
            "Name": "sensor-1",
            "IPv4": "10.0.0.5",
            "Owner": "lab"
        });
        let mut record: CheckinRecord = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(record.extra.get("Owner"), Some(&json!("lab")));

        record.assign(&CheckinFields {
            name: "sensor-1".into(),
            ipv4: "10.0.0.5".into(),
        });
        assert_eq!(serde_json::to_value(&record).unwrap(), stored);
    }

    #[test]
    fn empty_record_serializes_key_only() {
        let record = CheckinRecord::empty("sensor-1", "10.0.0.5");
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"pk": "sensor-1", "sk": "10.0.0.5"})
        );
        assert_eq!(
            record.partition_sort_key(),
            ("sensor-1".to_string(), "10.0.0.5".to_string())
        );
    }
}

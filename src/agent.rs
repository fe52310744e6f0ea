use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::config::StoreSettings;
use crate::error::{Result, StoreError};
use crate::model::{CheckinRecord, DynamoModel};
use crate::store::{CheckinStore, UpsertStatus};

pub struct DynamoAgent {
    pub client: Client,
    pub table_name: String,
}

impl DynamoAgent {
    /// Connects using the default AWS config chain, with optional region and
    /// endpoint overrides (e.g. DynamoDB Local at http://localhost:8000).
    pub async fn connect(settings: &StoreSettings) -> Self {
        let shared_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared_config);
        if let Some(region) = &settings.region {
            builder = builder.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        Self {
            client,
            table_name: settings.table_name.clone(),
        }
    }

    /// Creates the table keyed on `M`'s partition and sort attributes if it does not exist yet.
    pub async fn ensure_table<M: DynamoModel>(&self) -> Result<()> {
        let tables = self
            .client
            .list_tables()
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(e.to_string()))?;
        if tables.table_names().contains(&self.table_name) {
            debug!(table = %self.table_name, "table already exists");
            return Ok(());
        }

        info!(table = %self.table_name, "creating table");
        self.client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(string_attribute(M::PARTITION_KEY)?)
            .attribute_definitions(string_attribute(M::SORT_KEY)?)
            .key_schema(key_element(M::PARTITION_KEY, KeyType::Hash)?)
            .key_schema(key_element(M::SORT_KEY, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    /// Put item into DynamoDB, replacing any item with the same key.
    pub async fn put<M: DynamoModel + Serialize>(&self, item: &M) -> Result<UpsertStatus> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(model_to_item(item)?))
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(e.to_string()))?;

        // The SDK only returns Ok for a 2xx reply; everything else is an error above.
        Ok(UpsertStatus::OK)
    }

    /// Get item by (pk, sk)
    pub async fn get<M: DynamoModel + DeserializeOwned>(
        &self,
        keys: (String, String),
    ) -> Result<Option<M>> {
        let (pk, sk) = keys;
        let mut key_map = HashMap::new();
        key_map.insert(M::PARTITION_KEY.to_string(), AttributeValue::S(pk));
        key_map.insert(M::SORT_KEY.to_string(), AttributeValue::S(sk));

        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(key_map))
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(e.to_string()))?;

        output.item.map(item_to_model::<M>).transpose()
    }
}

#[async_trait]
impl CheckinStore for DynamoAgent {
    async fn fetch(&self, partition: &str, row: &str) -> Result<CheckinRecord> {
        self.get::<CheckinRecord>((partition.to_string(), row.to_string()))
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn upsert(&self, record: &CheckinRecord) -> Result<UpsertStatus> {
        self.put(record).await
    }
}

fn string_attribute(name: &str) -> Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| StoreError::Config(e.to_string()))
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(|e| StoreError::Config(e.to_string()))
}

/// Wraps attribute types JSON cannot hold exactly: `{"$dynamodb": {"SS": [...]}}`.
const TYPED: &str = "$dynamodb";

fn model_to_item<M: Serialize>(model: &M) -> Result<HashMap<String, AttributeValue>> {
    let json =
        serde_json::to_value(model).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let serde_json::Value::Object(map) = json else {
        return Err(StoreError::Serialization(
            "model did not serialize to an object".to_string(),
        ));
    };

    map.into_iter()
        .map(|(k, v)| json_value_to_av(v).map(|av| (k, av)))
        .collect()
}

fn item_to_model<M: DeserializeOwned>(item: HashMap<String, AttributeValue>) -> Result<M> {
    let mut map = serde_json::Map::new();
    for (k, v) in item {
        map.insert(k, av_to_json_value(&v)?);
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

// Helper: Convert serde_json::Value to AttributeValue
fn json_value_to_av(value: serde_json::Value) -> Result<AttributeValue> {
    match value {
        serde_json::Value::String(s) => Ok(AttributeValue::S(s)),
        serde_json::Value::Number(num) => Ok(AttributeValue::N(num.to_string())),
        serde_json::Value::Bool(b) => Ok(AttributeValue::Bool(b)),
        serde_json::Value::Null => Ok(AttributeValue::Null(true)),
        serde_json::Value::Array(arr) => {
            let vals = arr.into_iter().map(json_value_to_av).collect::<Result<_>>()?;
            Ok(AttributeValue::L(vals))
        }
        serde_json::Value::Object(mut map) => {
            if map.len() == 1 && matches!(map.get(TYPED), Some(serde_json::Value::Object(_))) {
                if let Some(serde_json::Value::Object(typed)) = map.remove(TYPED) {
                    return typed_to_av(typed);
                }
            }
            let mut av_map = HashMap::new();
            for (k, v) in map {
                av_map.insert(k, json_value_to_av(v)?);
            }
            Ok(AttributeValue::M(av_map))
        }
    }
}

// Helper: Convert AttributeValue to serde_json::Value
fn av_to_json_value(av: &AttributeValue) -> Result<serde_json::Value> {
    match av {
        AttributeValue::S(s) => Ok(serde_json::Value::String(s.clone())),
        AttributeValue::N(n) => Ok(exact_number(n)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| typed("N", serde_json::Value::String(n.clone())))),
        AttributeValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        AttributeValue::Null(_) => Ok(serde_json::Value::Null),
        AttributeValue::L(lst) => {
            let vals = lst.iter().map(av_to_json_value).collect::<Result<_>>()?;
            Ok(serde_json::Value::Array(vals))
        }
        AttributeValue::M(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                json_map.insert(k.clone(), av_to_json_value(v)?);
            }
            Ok(serde_json::Value::Object(json_map))
        }
        AttributeValue::Ss(set) => Ok(typed("SS", strings(set.iter().cloned()))),
        AttributeValue::Ns(set) => Ok(typed("NS", strings(set.iter().cloned()))),
        AttributeValue::B(blob) => Ok(typed(
            "B",
            serde_json::Value::String(STANDARD.encode(blob.clone().into_inner())),
        )),
        AttributeValue::Bs(set) => Ok(typed(
            "BS",
            strings(set.iter().map(|blob| STANDARD.encode(blob.clone().into_inner()))),
        )),
        _ => Err(StoreError::Deserialization(
            "Unsupported AttributeValue".to_string(),
        )),
    }
}

/// A JSON number only when it prints back to the very same text.
fn exact_number(n: &str) -> Option<serde_json::Number> {
    let number = if let Ok(i) = n.parse::<i64>() {
        serde_json::Number::from(i)
    } else if let Ok(u) = n.parse::<u64>() {
        serde_json::Number::from(u)
    } else {
        n.parse::<f64>().ok().and_then(serde_json::Number::from_f64)?
    };
    (number.to_string() == n).then_some(number)
}

fn typed(tag: &str, raw: serde_json::Value) -> serde_json::Value {
    let mut inner = serde_json::Map::new();
    inner.insert(tag.to_string(), raw);
    let mut outer = serde_json::Map::new();
    outer.insert(TYPED.to_string(), serde_json::Value::Object(inner));
    serde_json::Value::Object(outer)
}

fn strings(values: impl Iterator<Item = String>) -> serde_json::Value {
    serde_json::Value::Array(values.map(serde_json::Value::String).collect())
}

fn typed_to_av(typed: serde_json::Map<String, serde_json::Value>) -> Result<AttributeValue> {
    let malformed = || StoreError::Serialization(format!("malformed {TYPED} attribute"));
    let mut entries = typed.into_iter();
    let (Some((tag, raw)), None) = (entries.next(), entries.next()) else {
        return Err(malformed());
    };

    let raw_strings = |raw: serde_json::Value| -> Result<Vec<String>> {
        let serde_json::Value::Array(items) = raw else {
            return Err(malformed());
        };
        items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                _ => Err(malformed()),
            })
            .collect()
    };
    let blob = |encoded: &str| -> Result<Blob> {
        STANDARD
            .decode(encoded)
            .map(Blob::new)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    };

    match (tag.as_str(), raw) {
        ("N", serde_json::Value::String(n)) => Ok(AttributeValue::N(n)),
        ("B", serde_json::Value::String(b)) => Ok(AttributeValue::B(blob(&b)?)),
        ("SS", raw) => Ok(AttributeValue::Ss(raw_strings(raw)?)),
        ("NS", raw) => Ok(AttributeValue::Ns(raw_strings(raw)?)),
        ("BS", raw) => {
            let blobs = raw_strings(raw)?
                .iter()
                .map(|b| blob(b))
                .collect::<Result<_>>()?;
            Ok(AttributeValue::Bs(blobs))
        }
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckinFields;
    use serde_json::json;

    #[test]
    fn record_becomes_string_attributes() {
        let mut record = CheckinRecord::empty("sensor-1", "10.0.0.5");
        record.name = Some("sensor-1".into());
        record.ipv4 = Some("10.0.0.5".into());

        let av = json_value_to_av(serde_json::to_value(&record).unwrap()).unwrap();
        let AttributeValue::M(map) = av else {
            panic!("expected a map attribute");
        };
        assert_eq!(map.get("pk"), Some(&AttributeValue::S("sensor-1".into())));
        assert_eq!(map.get("sk"), Some(&AttributeValue::S("10.0.0.5".into())));
        assert_eq!(map.get("Name"), Some(&AttributeValue::S("sensor-1".into())));
        assert_eq!(map.get("IPv4"), Some(&AttributeValue::S("10.0.0.5".into())));
    }

    #[test]
    fn numbers_survive_both_directions() {
        let value = json!({"count": 3, "ratio": 0.5, "tags": ["a", true, null]});
        let back = av_to_json_value(&json_value_to_av(value.clone()).unwrap()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn large_numbers_are_written_back_verbatim() {
        for n in ["12345678901234567891", "123456789012345678901234567890", "007", "1e3", "-0"] {
            let av = AttributeValue::N(n.to_string());
            let back = json_value_to_av(av_to_json_value(&av).unwrap()).unwrap();
            assert_eq!(back, av, "number {n}");
        }
    }

    #[test]
    fn oversized_number_is_tagged_not_rounded() {
        let json = av_to_json_value(&AttributeValue::N("123456789012345678901234567890".into()))
            .unwrap();
        assert_eq!(json, json!({"$dynamodb": {"N": "123456789012345678901234567890"}}));
    }

    #[test]
    fn sets_and_binary_survive_both_directions() {
        let attributes = [
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
            AttributeValue::Ns(vec!["1".into(), "2.50".into()]),
            AttributeValue::B(Blob::new(vec![0, 1, 255])),
            AttributeValue::Bs(vec![Blob::new(vec![1]), Blob::new(vec![2, 3])]),
        ];
        for av in attributes {
            let back = json_value_to_av(av_to_json_value(&av).unwrap()).unwrap();
            assert_eq!(back, av);
        }
    }

    #[test]
    fn plain_map_with_marker_key_stays_a_map() {
        let value = json!({"$dynamodb": "not typed"});
        let AttributeValue::M(map) = json_value_to_av(value).unwrap() else {
            panic!("expected a map attribute");
        };
        assert_eq!(map.get("$dynamodb"), Some(&AttributeValue::S("not typed".into())));
    }

    #[test]
    fn checkin_keeps_foreign_set_and_number_attributes() {
        let mut item = HashMap::new();
        item.insert("pk".to_string(), AttributeValue::S("sensor-1".into()));
        item.insert("sk".to_string(), AttributeValue::S("10.0.0.5".into()));
        item.insert("Name".to_string(), AttributeValue::S("sensor-1".into()));
        item.insert("IPv4".to_string(), AttributeValue::S("10.0.0.5".into()));
        item.insert("Tags".to_string(), AttributeValue::Ss(vec!["lab".into()]));
        item.insert("Serial".to_string(), AttributeValue::N("12345678901234567891".into()));

        let mut record: CheckinRecord = item_to_model(item.clone()).unwrap();
        record.assign(&CheckinFields {
            name: "sensor-1".into(),
            ipv4: "10.0.0.5".into(),
        });

        assert_eq!(model_to_item(&record).unwrap(), item);
    }
}

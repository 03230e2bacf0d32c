//! Partition scoping and item shaping.
//!
//! Every item this service writes carries the configured partition field, and
//! every request names the partition in `x-ms-documentdb-partitionkey`. Items
//! also carry Cosmos DB's required `id`, which mirrors `orderId`.

use makeline_core::order::{ORDER_ID_FIELD, Order, STATUS_FIELD};
use makeline_core::repository::RepositoryError;
use serde_json::{Map, Value};

/// Cosmos DB's required item identifier.
const ITEM_ID_FIELD: &str = "id";

/// Properties Cosmos DB adds to every stored item.
const SYSTEM_FIELDS: [&str; 5] = ["_rid", "_self", "_etag", "_attachments", "_ts"];

/// The partition all of this service's orders live in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionKey {
    key: String,
    value: String,
}

impl PartitionKey {
    /// Create a partition key from its field name and the value stamped on
    /// every order.
    ///
    /// A leading `/` on the field name (Cosmos DB path syntax) is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if the field name is empty or
    /// would collide with a field the service owns.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, RepositoryError> {
        let key = key.into();
        let key = key.trim_start_matches('/').to_string();

        if key.is_empty() || [ORDER_ID_FIELD, STATUS_FIELD, ITEM_ID_FIELD].contains(&key.as_str()) {
            return Err(RepositoryError::DatabaseError(format!(
                "Unusable Cosmos DB partition key field: {key:?}"
            )));
        }

        Ok(Self {
            key,
            value: value.into(),
        })
    }

    /// Partition field name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Partition value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Value of the `x-ms-documentdb-partitionkey` header.
    pub(crate) fn header_value(&self) -> String {
        Value::Array(vec![Value::String(self.value.clone())]).to_string()
    }

    /// Encodes an order as a Cosmos DB item in this partition.
    pub(crate) fn to_item(&self, order: &Order) -> Result<Map<String, Value>, RepositoryError> {
        let mut item = match serde_json::to_value(order) {
            Ok(Value::Object(item)) => item,
            Ok(other) => {
                return Err(RepositoryError::SerializationError(format!(
                    "Order {} encoded as {other}",
                    order.order_id
                )));
            },
            Err(e) => {
                return Err(RepositoryError::SerializationError(format!(
                    "Failed to encode order {}: {e}",
                    order.order_id
                )));
            },
        };

        item.insert(
            ITEM_ID_FIELD.to_string(),
            Value::String(order.order_id.to_string()),
        );
        item.insert(self.key.clone(), Value::String(self.value.clone()));
        Ok(item)
    }

    /// Decodes a stored item, dropping store bookkeeping and the partition
    /// field.
    pub(crate) fn from_item(&self, mut item: Map<String, Value>) -> Result<Order, RepositoryError> {
        item.remove(ITEM_ID_FIELD);
        item.remove(&self.key);
        for field in SYSTEM_FIELDS {
            item.remove(field);
        }

        serde_json::from_value(Value::Object(item)).map_err(|e| {
            RepositoryError::SerializationError(format!("Failed to decode stored order: {e}"))
        })
    }
}

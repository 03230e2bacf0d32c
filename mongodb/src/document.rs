//! Conversion between [`Order`]s and BSON documents.
//!
//! Stored shape: `{ orderId: "<id>", status: <int>, ...payload }`. The store's
//! own `_id` is never part of an order: reads project it away, decoding drops
//! it, and updates never write it.

use makeline_core::order::{ORDER_ID_FIELD, Order};
use makeline_core::repository::RepositoryError;
use mongodb::bson::{self, Document};

/// Field holding MongoDB's internal document id.
const MONGO_ID_FIELD: &str = "_id";

/// Encodes an order as a BSON document.
pub(crate) fn to_document(order: &Order) -> Result<Document, RepositoryError> {
    bson::to_document(order).map_err(|e| {
        RepositoryError::SerializationError(format!(
            "Failed to encode order {}: {e}",
            order.order_id
        ))
    })
}

/// Builds the `$set` body of an update: every field except the business key
/// and the immutable `_id`.
pub(crate) fn to_update_document(order: &Order) -> Result<Document, RepositoryError> {
    let mut document = to_document(order)?;
    document.remove(ORDER_ID_FIELD);
    document.remove(MONGO_ID_FIELD);
    Ok(document)
}

/// Decodes a stored document into an order.
pub(crate) fn from_document(mut document: Document) -> Result<Order, RepositoryError> {
    document.remove(MONGO_ID_FIELD);
    bson::from_document(document).map_err(|e| {
        RepositoryError::SerializationError(format!("Failed to decode stored order: {e}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use makeline_core::order::{OrderId, OrderStatus};
    use mongodb::bson::{doc, oid::ObjectId};
    use serde_json::json;

    fn sample() -> Order {
        Order::new(OrderId::parse("42").unwrap(), OrderStatus::Pending)
            .with_field("customerId", "4321")
            .with_field("items", json!([{"productId": 3, "quantity": 2, "price": 12.5}]))
    }

    #[test]
    fn stores_id_and_integer_status() {
        let document = to_document(&sample()).unwrap();

        assert_eq!(document.get_str("orderId").unwrap(), "42");
        assert_eq!(document.get_i64("status").unwrap(), 1);
        assert_eq!(document.get_str("customerId").unwrap(), "4321");
    }

    #[test]
    fn update_document_omits_business_key() {
        let document = to_update_document(&sample()).unwrap();

        assert!(!document.contains_key("orderId"));
        assert!(document.contains_key("status"));
    }

    #[test]
    fn update_document_never_sets_store_id() {
        let order = sample().with_field("_id", "client-supplied");

        let document = to_update_document(&order).unwrap();

        assert!(!document.contains_key("_id"));
        assert_eq!(document.get_str("customerId").unwrap(), "4321");
    }

    #[test]
    fn decodes_documents_written_by_other_services() {
        let stored = doc! {
            "_id": ObjectId::new(),
            "orderId": "42",
            "status": 2_i32,
            "customerId": "4321",
        };

        let order = from_document(stored).unwrap();

        assert_eq!(order.order_id.as_str(), "42");
        assert_eq!(order.status, OrderStatus::Processing);
        assert!(!order.payload.contains_key("_id"));
    }

    #[test]
    fn round_trips_payload() {
        let order = sample();
        let decoded = from_document(to_document(&order).unwrap()).unwrap();

        assert_eq!(decoded, order);
    }

    #[test]
    fn rejects_unknown_status() {
        let stored = doc! { "orderId": "1", "status": 9_i32 };
        assert!(matches!(
            from_document(stored),
            Err(RepositoryError::SerializationError(_))
        ));
    }
}

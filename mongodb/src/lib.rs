//! MongoDB document-store backend for the makeline.
//!
//! Orders live in a single collection addressed purely by their `orderId`.
//! There is no partitioning: lookups and updates are single-field equality
//! filters.
//!
//! # Idempotent Insert
//!
//! At construction the repository ensures a unique index on `orderId`, so the
//! store itself rejects a second copy of an order. Bulk inserts are unordered:
//! every order is attempted, and a batch whose only failures are duplicate-key
//! errors (code `11000`) counts as a success. Any other write error fails the
//! call.
//!
//! # Example
//!
//! ```no_run
//! use makeline_mongodb::MongoOrderRepository;
//! use makeline_core::repository::OrderRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = MongoOrderRepository::builder()
//!     .uri("mongodb://localhost:27017")
//!     .database("orderdb")
//!     .collection("orders")
//!     .build()
//!     .await?;
//!
//! let pending = repo.get_pending_orders().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod document;

use futures::TryStreamExt;
use makeline_core::order::{ORDER_ID_FIELD, Order, OrderId, OrderStatus, STATUS_FIELD};
use makeline_core::repository::{
    OrderRepository, RepositoryError, RepositoryFuture, sort_by_id,
};
use mongodb::bson::{Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, Credential, IndexOptions};
use mongodb::{Client, Collection, IndexModel};

/// Server error code for a unique-index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Order repository backed by a MongoDB collection.
///
/// The client is created once and shared; the driver pools connections
/// internally, so cloning the repository or sharing it behind an `Arc` is cheap.
#[derive(Clone, Debug)]
pub struct MongoOrderRepository {
    collection: Collection<Document>,
}

impl MongoOrderRepository {
    /// Create a new builder for configuring the repository.
    #[must_use]
    pub fn builder() -> MongoOrderRepositoryBuilder {
        MongoOrderRepositoryBuilder::default()
    }

    /// Wraps an existing collection and ensures the unique `orderId` index.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if the index cannot be created,
    /// which also covers an unreachable server.
    pub async fn from_collection(collection: Collection<Document>) -> Result<Self, RepositoryError> {
        let index = IndexModel::builder()
            .keys(doc! { ORDER_ID_FIELD: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|e| database_error("create_index", &e))?;

        tracing::info!(
            database = %collection.namespace().db,
            collection = %collection.name(),
            "MongoDB order repository ready"
        );

        Ok(Self { collection })
    }
}

/// Builder for a [`MongoOrderRepository`].
#[derive(Default)]
pub struct MongoOrderRepositoryBuilder {
    uri: Option<String>,
    database: Option<String>,
    collection: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl MongoOrderRepositoryBuilder {
    /// Set the connection string (e.g. `mongodb://localhost:27017`).
    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the collection name.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Authenticate with a username and password.
    ///
    /// Ignored when `username` is empty, so unauthenticated local servers work
    /// with the same configuration surface.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into()).filter(|u| !u.is_empty());
        self.password = Some(password.into());
        self
    }

    /// Connect and build the repository.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if a required setting is
    /// missing, the connection string is invalid, or the server cannot be
    /// reached.
    pub async fn build(self) -> Result<MongoOrderRepository, RepositoryError> {
        let uri = required(self.uri, "uri")?;
        let database = required(self.database, "database")?;
        let collection = required(self.collection, "collection")?;

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| database_error("parse_uri", &e))?;
        options.app_name = Some("makeline-service".to_string());
        if let Some(username) = self.username {
            options.credential = Some(
                Credential::builder()
                    .username(username)
                    .password(self.password)
                    .build(),
            );
        }

        let client = Client::with_options(options).map_err(|e| database_error("connect", &e))?;
        let collection = client.database(&database).collection::<Document>(&collection);

        MongoOrderRepository::from_collection(collection).await
    }
}

impl OrderRepository for MongoOrderRepository {
    fn insert_orders(&self, orders: Vec<Order>) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            if orders.is_empty() {
                return Ok(());
            }

            let documents = orders
                .iter()
                .map(document::to_document)
                .collect::<Result<Vec<_>, _>>()?;

            match self.collection.insert_many(documents).ordered(false).await {
                Ok(result) => {
                    tracing::debug!(inserted = result.inserted_ids.len(), "Inserted orders");
                    Ok(())
                },
                Err(e) if is_duplicate_key_only(&e) => {
                    tracing::debug!(
                        attempted = orders.len(),
                        "Skipped orders that were already stored"
                    );
                    Ok(())
                },
                Err(e) => Err(database_error("insert_orders", &e)),
            }
        })
    }

    fn get_pending_orders(&self) -> RepositoryFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let filter = doc! { STATUS_FIELD: i64::from(OrderStatus::Pending) };

            let documents: Vec<Document> = self
                .collection
                .find(filter)
                .projection(doc! { "_id": 0 })
                .await
                .map_err(|e| database_error("get_pending_orders", &e))?
                .try_collect()
                .await
                .map_err(|e| database_error("get_pending_orders", &e))?;

            let mut orders = documents
                .into_iter()
                .map(document::from_document)
                .collect::<Result<Vec<_>, _>>()?;
            sort_by_id(&mut orders);
            Ok(orders)
        })
    }

    fn get_order<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Order> {
        Box::pin(async move {
            let found = self
                .collection
                .find_one(doc! { ORDER_ID_FIELD: id.as_str() })
                .projection(doc! { "_id": 0 })
                .await
                .map_err(|e| database_error("get_order", &e))?;

            match found {
                Some(document) => document::from_document(document),
                None => Err(RepositoryError::NotFound(id.clone())),
            }
        })
    }

    fn update_order(&self, order: Order) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let changes = document::to_update_document(&order)?;

            let result = self
                .collection
                .update_one(
                    doc! { ORDER_ID_FIELD: order.order_id.as_str() },
                    doc! { "$set": changes },
                )
                .await
                .map_err(|e| database_error("update_order", &e))?;

            if result.matched_count == 0 {
                return Err(RepositoryError::NotFound(order.order_id));
            }
            Ok(())
        })
    }
}

/// Whether a write failed only because some orders were already stored.
fn is_duplicate_key_only(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::InsertMany(failure) => {
            failure.write_concern_error.is_none()
                && failure
                    .write_errors
                    .as_ref()
                    .is_some_and(|errors| errors.iter().all(|e| e.code == DUPLICATE_KEY_CODE))
        },
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

fn database_error(operation: &str, err: &MongoError) -> RepositoryError {
    tracing::error!(operation, error = %err, "MongoDB operation failed");
    RepositoryError::DatabaseError(format!("{operation}: {err}"))
}

fn required(value: Option<String>, name: &str) -> Result<String, RepositoryError> {
    value.ok_or_else(|| RepositoryError::DatabaseError(format!("MongoDB {name} not configured")))
}

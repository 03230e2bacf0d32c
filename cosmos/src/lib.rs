//! Azure Cosmos DB (SQL API) backend for the makeline.
//!
//! Talks to the Cosmos DB REST API directly over HTTPS. All orders written by
//! this service live in one configured logical partition, and every read and
//! write is scoped to it.
//!
//! # Idempotent Insert
//!
//! Orders are created one by one with their `orderId` as the item `id`. A
//! `409 Conflict` means the order is already stored and counts as success, so
//! redelivered queue messages never produce a second copy.
//!
//! # Example
//!
//! ```no_run
//! use makeline_cosmos::{CosmosCredential, CosmosOrderRepository, PartitionKey};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = CosmosOrderRepository::builder()
//!     .endpoint("https://myaccount.documents.azure.com:443/")
//!     .database("orderdb")
//!     .container("orders")
//!     .partition_key(PartitionKey::new("storeId", "pets")?)
//!     .credential(CosmosCredential::shared_key("c2VjcmV0")?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod partition;

pub use auth::{CosmosCredential, DEFAULT_AUTHORITY_HOST, WorkloadIdentity};
pub use partition::PartitionKey;

use auth::SignedRequest;
use makeline_core::order::{Order, OrderId, OrderStatus};
use makeline_core::repository::{
    OrderRepository, RepositoryError, RepositoryFuture, sort_by_id,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// REST API version sent with every request.
const API_VERSION: &str = "2018-12-31";

const PENDING_QUERY: &str = "SELECT * FROM o WHERE o.status = @status";

/// One page of query results.
#[derive(Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents")]
    documents: Vec<Map<String, Value>>,
}

/// Order repository backed by a Cosmos DB container.
#[derive(Clone, Debug)]
pub struct CosmosOrderRepository {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    container: String,
    partition: PartitionKey,
    credential: Arc<CosmosCredential>,
}

impl CosmosOrderRepository {
    /// Create a new builder for configuring the repository.
    #[must_use]
    pub fn builder() -> CosmosOrderRepositoryBuilder {
        CosmosOrderRepositoryBuilder::default()
    }

    /// Starts an authorized request against the container's items.
    ///
    /// `item` selects a single item; `None` addresses the item feed, which is
    /// where creates and queries go.
    async fn request(
        &self,
        method: Method,
        item: Option<&OrderId>,
    ) -> Result<RequestBuilder, RepositoryError> {
        let collection_link = format!("dbs/{}/colls/{}", self.database, self.container);
        let (resource_link, url) = match item {
            Some(id) => {
                let link = format!("{collection_link}/docs/{id}");
                let url = format!("{}/{link}", self.endpoint);
                (link, url)
            },
            None => {
                let url = format!("{}/{collection_link}/docs", self.endpoint);
                (collection_link, url)
            },
        };

        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let authorization = self
            .credential
            .authorization(
                &self.http,
                &SignedRequest {
                    verb: method.as_str(),
                    resource_type: "docs",
                    resource_link: &resource_link,
                    date: &date,
                },
            )
            .await?;

        Ok(self
            .http
            .request(method, url)
            .header("authorization", authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-partitionkey", self.partition.header_value()))
    }

    /// Reads one raw item; `404` becomes [`RepositoryError::NotFound`].
    async fn read_item(&self, id: &OrderId) -> Result<Map<String, Value>, RepositoryError> {
        let response = self
            .request(Method::GET, Some(id))
            .await?
            .send()
            .await
            .map_err(|e| transport_error("get_order", &e))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| RepositoryError::SerializationError(format!("Invalid item body: {e}"))),
            StatusCode::NOT_FOUND => Err(RepositoryError::NotFound(id.clone())),
            _ => Err(failure("get_order", response).await),
        }
    }
}

impl OrderRepository for CosmosOrderRepository {
    fn insert_orders(&self, orders: Vec<Order>) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let mut duplicates = 0_usize;

            for order in &orders {
                let item = self.partition.to_item(order)?;
                let response = self
                    .request(Method::POST, None)
                    .await?
                    .json(&item)
                    .send()
                    .await
                    .map_err(|e| transport_error("insert_orders", &e))?;

                match response.status() {
                    StatusCode::CREATED => {},
                    StatusCode::CONFLICT => duplicates += 1,
                    _ => return Err(failure("insert_orders", response).await),
                }
            }

            tracing::debug!(
                attempted = orders.len(),
                duplicates,
                "Inserted orders into Cosmos DB"
            );
            Ok(())
        })
    }

    fn get_pending_orders(&self) -> RepositoryFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let query = json!({
                "query": PENDING_QUERY,
                "parameters": [{ "name": "@status", "value": i64::from(OrderStatus::Pending) }],
            })
            .to_string();

            let mut orders = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let mut request = self
                    .request(Method::POST, None)
                    .await?
                    .header("x-ms-documentdb-isquery", "True")
                    .header(CONTENT_TYPE, "application/query+json")
                    .body(query.clone());
                if let Some(token) = &continuation {
                    request = request.header("x-ms-continuation", token);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error("get_pending_orders", &e))?;
                if response.status() != StatusCode::OK {
                    return Err(failure("get_pending_orders", response).await);
                }

                continuation = response
                    .headers()
                    .get("x-ms-continuation")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);

                let page: QueryPage = response.json().await.map_err(|e| {
                    RepositoryError::SerializationError(format!("Invalid query response: {e}"))
                })?;
                for item in page.documents {
                    orders.push(self.partition.from_item(item)?);
                }

                if continuation.is_none() {
                    break;
                }
            }

            sort_by_id(&mut orders);
            Ok(orders)
        })
    }

    fn get_order<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Order> {
        Box::pin(async move {
            let item = self.read_item(id).await?;
            self.partition.from_item(item)
        })
    }

    fn update_order(&self, order: Order) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let mut stored = self
                .partition
                .from_item(self.read_item(&order.order_id).await?)?;
            stored.status = order.status;
            stored.payload.extend(order.payload);
            let item = self.partition.to_item(&stored)?;

            let response = self
                .request(Method::PUT, Some(&stored.order_id))
                .await?
                .json(&item)
                .send()
                .await
                .map_err(|e| transport_error("update_order", &e))?;

            match response.status() {
                StatusCode::OK => Ok(()),
                StatusCode::NOT_FOUND => Err(RepositoryError::NotFound(stored.order_id)),
                _ => Err(failure("update_order", response).await),
            }
        })
    }
}

fn transport_error(operation: &str, err: &reqwest::Error) -> RepositoryError {
    tracing::error!(operation, error = %err, "Cosmos DB request failed");
    RepositoryError::DatabaseError(format!("{operation}: {err}"))
}

async fn failure(operation: &str, response: Response) -> RepositoryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(operation, %status, %body, "Cosmos DB rejected request");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RepositoryError::AuthenticationError(format!("{operation}: {status}"))
        },
        _ => RepositoryError::DatabaseError(format!("{operation}: {status}: {body}")),
    }
}

/// Builder for a [`CosmosOrderRepository`].
#[derive(Default)]
pub struct CosmosOrderRepositoryBuilder {
    endpoint: Option<String>,
    database: Option<String>,
    container: Option<String>,
    partition: Option<PartitionKey>,
    credential: Option<CosmosCredential>,
}

impl CosmosOrderRepositoryBuilder {
    /// Set the account endpoint (e.g. `https://myaccount.documents.azure.com:443/`).
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the container name.
    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Set the partition orders are written to and read from.
    #[must_use]
    pub fn partition_key(mut self, partition: PartitionKey) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Set how requests are authorized.
    #[must_use]
    pub fn credential(mut self, credential: CosmosCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Build the repository.
    ///
    /// No request is made here; connectivity problems surface on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if a setting is missing or the
    /// HTTP client cannot be created.
    pub fn build(self) -> Result<CosmosOrderRepository, RepositoryError> {
        let endpoint = required(self.endpoint, "endpoint")?;
        let database = required(self.database, "database")?;
        let container = required(self.container, "container")?;
        let partition = self.partition.ok_or_else(|| missing("partition key"))?;
        let credential = self.credential.ok_or_else(|| missing("credential"))?;

        let http = reqwest::Client::builder()
            .user_agent("makeline-service")
            .build()
            .map_err(|e| RepositoryError::DatabaseError(format!("HTTP client: {e}")))?;

        tracing::info!(
            %endpoint,
            %database,
            %container,
            partition_key = partition.key(),
            "Cosmos DB order repository ready"
        );

        Ok(CosmosOrderRepository {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database,
            container,
            partition,
            credential: Arc::new(credential),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, RepositoryError> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| missing(name))
}

fn missing(name: &str) -> RepositoryError {
    RepositoryError::DatabaseError(format!("Cosmos DB {name} not configured"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_every_setting() {
        let result = CosmosOrderRepository::builder()
            .endpoint("https://acct.documents.azure.com")
            .database("orderdb")
            .container("orders")
            .build();

        assert!(matches!(result, Err(RepositoryError::DatabaseError(_))));
    }

    #[test]
    fn endpoint_trailing_slash_is_dropped() {
        let repo = CosmosOrderRepository::builder()
            .endpoint("https://acct.documents.azure.com:443/")
            .database("orderdb")
            .container("orders")
            .partition_key(PartitionKey::new("storeId", "pets").unwrap())
            .credential(CosmosCredential::shared_key("c2VjcmV0").unwrap())
            .build()
            .unwrap();

        assert_eq!(repo.endpoint, "https://acct.documents.azure.com:443");
    }
}

//! Makeline server.
//!
//! Wires the configured order store and the order topic consumer into the
//! HTTP surface.
//!
//! # Usage
//!
//! ```bash
//! export ORDER_DB_URI=mongodb://localhost:27017
//! export ORDER_DB_NAME=orderdb
//! export ORDER_DB_COLLECTION_NAME=orders
//! cargo run --bin makeline-server
//! ```
//!
//! See [`config`] for every variable.

mod config;

use anyhow::Context;
use config::{Config, CosmosAuth, DatabaseConfig, QueueConfig};
use makeline_core::OrderService;
use makeline_core::queue::OrderQueue;
use makeline_core::repository::OrderRepository;
use makeline_cosmos::{CosmosCredential, CosmosOrderRepository, PartitionKey, WorkloadIdentity};
use makeline_mongodb::MongoOrderRepository;
use makeline_redpanda::RedpandaOrderQueue;
use makeline_web::{AppState, build_router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,makeline=debug".into()))
        .with(fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    if let Some(port) = config.server.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!(port, "Prometheus metrics exporter listening");
    }

    let repository = connect_repository(&config.database).await?;
    let queue = connect_queue(&config.queue)?;

    let service =
        OrderService::new(repository, queue).with_timeout(config.server.request_timeout);
    let app = build_router(AppState::new(service, config.server.version.as_str()));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    tracing::info!(
        address = %address,
        version = %config.server.version,
        "Makeline server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Makeline server stopped");
    Ok(())
}

async fn connect_repository(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn OrderRepository>> {
    tracing::info!(backend = database.backend(), "Connecting to order store");

    match database {
        DatabaseConfig::Mongo {
            uri,
            database,
            collection,
            credentials,
        } => {
            let mut builder = MongoOrderRepository::builder()
                .uri(uri)
                .database(database)
                .collection(collection);
            if let Some((username, password)) = credentials {
                builder = builder.credentials(username, password.expose());
            }
            let repository = builder
                .build()
                .await
                .context("Failed to connect to MongoDB")?;
            Ok(Arc::new(repository))
        }
        DatabaseConfig::Cosmos {
            endpoint,
            database,
            container,
            partition_key,
            partition_value,
            auth,
        } => {
            let credential = match auth {
                CosmosAuth::SharedKey(key) => CosmosCredential::shared_key(key.expose())
                    .context("Invalid Cosmos DB account key")?,
                CosmosAuth::WorkloadIdentity {
                    client_id,
                    tenant_id,
                    token_file,
                    authority_host,
                } => CosmosCredential::WorkloadIdentity(
                    WorkloadIdentity::new(
                        endpoint,
                        client_id,
                        tenant_id,
                        token_file,
                        authority_host,
                    )
                    .context("Invalid workload identity settings")?,
                ),
            };
            let partition = PartitionKey::new(partition_key, partition_value)
                .context("Invalid partition key")?;
            let repository = CosmosOrderRepository::builder()
                .endpoint(endpoint)
                .database(database)
                .container(container)
                .partition_key(partition)
                .credential(credential)
                .build()
                .context("Failed to configure Cosmos DB client")?;
            Ok(Arc::new(repository))
        }
    }
}

fn connect_queue(queue: &QueueConfig) -> anyhow::Result<Arc<dyn OrderQueue>> {
    let mut builder = RedpandaOrderQueue::builder()
        .brokers(&queue.brokers)
        .topic(&queue.topic)
        .consumer_group(&queue.consumer_group)
        .batch_size(queue.batch_size)
        .poll_timeout(queue.poll_timeout);
    if let Some(protocol) = &queue.security_protocol {
        builder = builder.security_protocol(protocol);
    }
    if let Some((mechanism, username, password)) = &queue.sasl {
        builder = builder.sasl(mechanism, username, password.expose());
    }

    let consumer = builder.build().context("Failed to create order consumer")?;
    tracing::info!(
        brokers = %queue.brokers,
        topic = %queue.topic,
        group = %queue.consumer_group,
        "Subscribed to order topic"
    );
    Ok(Arc::new(consumer))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

//! Configuration for the makeline server.
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file). Empty variables count as unset.

use makeline_cosmos::DEFAULT_AUTHORITY_HOST;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration errors, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable (and all its fallbacks) is unset.
    #[error("{name} is not set{}", fallback_hint(.fallbacks))]
    Missing {
        /// Primary variable name.
        name: &'static str,
        /// Variables tried after `name`.
        fallbacks: &'static [&'static str],
    },

    /// A variable is set but cannot be parsed.
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

fn fallback_hint(fallbacks: &[&str]) -> String {
    if fallbacks.is_empty() {
        String::new()
    } else {
        format!(" (also tried {})", fallbacks.join(", "))
    }
}

/// A value that must not show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// The raw value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Order store.
    pub database: DatabaseConfig,
    /// Incoming order topic.
    pub queue: QueueConfig,
    /// HTTP server.
    pub server: ServerConfig,
}

/// Which backend stores orders, and how to reach it.
#[derive(Debug, Clone)]
pub enum DatabaseConfig {
    /// MongoDB API (also used for Cosmos DB's Mongo API).
    Mongo {
        /// Connection string.
        uri: String,
        /// Database name.
        database: String,
        /// Collection name.
        collection: String,
        /// Username and password, when the store requires authentication.
        credentials: Option<(String, Secret)>,
    },
    /// Cosmos DB SQL API.
    Cosmos {
        /// Account endpoint.
        endpoint: String,
        /// Database name.
        database: String,
        /// Container name.
        container: String,
        /// Partition key path.
        partition_key: String,
        /// Partition value written to and queried from every item.
        partition_value: String,
        /// How requests are authorized.
        auth: CosmosAuth,
    },
}

/// Cosmos DB request authorization.
#[derive(Debug, Clone)]
pub enum CosmosAuth {
    /// Base64 account key.
    SharedKey(Secret),
    /// Entra ID workload identity federation.
    WorkloadIdentity {
        /// Application (client) ID.
        client_id: String,
        /// Directory (tenant) ID.
        tenant_id: String,
        /// Projected service account token.
        token_file: PathBuf,
        /// Entra ID authority.
        authority_host: String,
    },
}

/// Order topic consumer settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bootstrap servers.
    pub brokers: String,
    /// Topic orders are published to.
    pub topic: String,
    /// Consumer group.
    pub consumer_group: String,
    /// Max messages per poll.
    pub batch_size: usize,
    /// Idle wait that ends a poll.
    pub poll_timeout: Duration,
    /// `security.protocol`, if not plaintext.
    pub security_protocol: Option<String>,
    /// SASL mechanism, username and password.
    pub sasl: Option<(String, String, Secret)>,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Version reported by `/health`.
    pub version: String,
    /// Bound on each storage or queue call.
    pub request_timeout: Duration,
    /// Prometheus exporter port, disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        Ok(Self {
            database: DatabaseConfig::load(&env)?,
            queue: QueueConfig::load(&env)?,
            server: ServerConfig::load(&env)?,
        })
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(
        &self,
        name: &'static str,
        fallbacks: &'static [&'static str],
    ) -> Result<String, ConfigError> {
        std::iter::once(name)
            .chain(fallbacks.iter().copied())
            .find_map(|n| self.get(n))
            .ok_or(ConfigError::Missing { name, fallbacks })
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        let Some(value) = self.get(name) else {
            return Ok(false);
        };
        value
            .to_ascii_lowercase()
            .parse()
            .map_err(|e: std::str::ParseBoolError| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            })
    }
}

impl DatabaseConfig {
    fn load(env: &Env<'_>) -> Result<Self, ConfigError> {
        let uri = env.required("AZURE_COSMOS_RESOURCEENDPOINT", &["ORDER_DB_URI"])?;
        let database = env.required("ORDER_DB_NAME", &[])?;

        if env.get("ORDER_DB_API").as_deref() != Some("cosmosdbsql") {
            let credentials = env
                .get("ORDER_DB_USERNAME")
                .map(|user| (user, Secret(env.or("ORDER_DB_PASSWORD", ""))));
            return Ok(Self::Mongo {
                uri,
                database,
                collection: env.required("ORDER_DB_COLLECTION_NAME", &[])?,
                credentials,
            });
        }

        let auth = if env.flag("USE_WORKLOAD_IDENTITY_AUTH")? {
            CosmosAuth::WorkloadIdentity {
                client_id: env.required("AZURE_CLIENT_ID", &[])?,
                tenant_id: env.required("AZURE_TENANT_ID", &[])?,
                token_file: env.required("AZURE_FEDERATED_TOKEN_FILE", &[])?.into(),
                authority_host: env.or("AZURE_AUTHORITY_HOST", DEFAULT_AUTHORITY_HOST),
            }
        } else {
            CosmosAuth::SharedKey(Secret(env.required("ORDER_DB_PASSWORD", &[])?))
        };

        Ok(Self::Cosmos {
            endpoint: uri,
            database,
            container: env.required("ORDER_DB_CONTAINER_NAME", &[])?,
            partition_key: env.required("ORDER_DB_PARTITION_KEY", &[])?,
            partition_value: env.required("ORDER_DB_PARTITION_VALUE", &[])?,
            auth,
        })
    }

    /// Short backend name for logs.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Mongo { .. } => "mongodb",
            Self::Cosmos { .. } => "cosmosdbsql",
        }
    }
}

impl QueueConfig {
    fn load(env: &Env<'_>) -> Result<Self, ConfigError> {
        let sasl = env.get("ORDER_QUEUE_SASL_MECHANISM").map(|mechanism| {
            (
                mechanism,
                env.or("ORDER_QUEUE_USERNAME", ""),
                Secret(env.or("ORDER_QUEUE_PASSWORD", "")),
            )
        });

        Ok(Self {
            brokers: env.or("ORDER_QUEUE_BROKERS", "localhost:9092"),
            topic: env.or("ORDER_QUEUE_NAME", "orders"),
            consumer_group: env.or("ORDER_QUEUE_CONSUMER_GROUP", "makeline-service"),
            batch_size: env.parse("ORDER_QUEUE_BATCH_SIZE")?.unwrap_or(10),
            poll_timeout: Duration::from_millis(
                env.parse("ORDER_QUEUE_POLL_TIMEOUT_MS")?.unwrap_or(250),
            ),
            security_protocol: env.get("ORDER_QUEUE_SECURITY_PROTOCOL"),
            sasl,
        })
    }
}

impl ServerConfig {
    fn load(env: &Env<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: env.or("HOST", "0.0.0.0"),
            port: env.parse("PORT")?.unwrap_or(3001),
            version: env.or("APP_VERSION", ""),
            request_timeout: Duration::from_secs(
                env.parse("REQUEST_TIMEOUT_SECS")?.unwrap_or(30),
            ),
            metrics_port: env.parse("METRICS_PORT")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const MONGO: &[(&str, &str)] = &[
        ("ORDER_DB_URI", "mongodb://localhost:27017"),
        ("ORDER_DB_NAME", "orderdb"),
        ("ORDER_DB_COLLECTION_NAME", "orders"),
    ];

    fn cosmos(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut vars = vec![
            ("ORDER_DB_API", "cosmosdbsql"),
            ("AZURE_COSMOS_RESOURCEENDPOINT", "https://acct.documents.azure.com/"),
            ("ORDER_DB_NAME", "orderdb"),
            ("ORDER_DB_CONTAINER_NAME", "orders"),
            ("ORDER_DB_PARTITION_KEY", "storeId"),
            ("ORDER_DB_PARTITION_VALUE", "pets"),
        ];
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn mongo_with_defaults() {
        let config = load(MONGO).unwrap();

        match &config.database {
            DatabaseConfig::Mongo {
                uri,
                database,
                collection,
                credentials,
            } => {
                assert_eq!(uri, "mongodb://localhost:27017");
                assert_eq!(database, "orderdb");
                assert_eq!(collection, "orders");
                assert!(credentials.is_none());
            }
            DatabaseConfig::Cosmos { .. } => panic!("expected mongo"),
        }
        assert_eq!(config.database.backend(), "mongodb");
        assert_eq!(config.queue.brokers, "localhost:9092");
        assert_eq!(config.queue.topic, "orders");
        assert_eq!(config.queue.consumer_group, "makeline-service");
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.poll_timeout, Duration::from_millis(250));
        assert!(config.queue.sasl.is_none());
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.version, "");
        assert_eq!(config.server.request_timeout, Duration::from_secs(30));
        assert!(config.server.metrics_port.is_none());
    }

    #[test]
    fn endpoint_variable_wins_over_uri() {
        let mut vars = MONGO.to_vec();
        vars.push(("AZURE_COSMOS_RESOURCEENDPOINT", "mongodb://cosmos:10255"));

        let config = load(&vars).unwrap();

        let DatabaseConfig::Mongo { uri, .. } = config.database else {
            panic!("expected mongo");
        };
        assert_eq!(uri, "mongodb://cosmos:10255");
    }

    #[test]
    fn empty_primary_falls_back() {
        let mut vars = MONGO.to_vec();
        vars.push(("AZURE_COSMOS_RESOURCEENDPOINT", ""));

        let config = load(&vars).unwrap();

        let DatabaseConfig::Mongo { uri, .. } = config.database else {
            panic!("expected mongo");
        };
        assert_eq!(uri, "mongodb://localhost:27017");
    }

    #[test]
    fn missing_uri_names_fallback() {
        let err = load(&[("ORDER_DB_NAME", "orderdb")]).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Missing {
                name: "AZURE_COSMOS_RESOURCEENDPOINT",
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "AZURE_COSMOS_RESOURCEENDPOINT is not set (also tried ORDER_DB_URI)"
        );
    }

    #[test]
    fn mongo_requires_collection() {
        let err = load(&MONGO[..2]).unwrap_err();

        assert_eq!(err.to_string(), "ORDER_DB_COLLECTION_NAME is not set");
    }

    #[test]
    fn mongo_credentials_when_username_set() {
        let mut vars = MONGO.to_vec();
        vars.push(("ORDER_DB_USERNAME", "maker"));
        vars.push(("ORDER_DB_PASSWORD", "hunter2"));

        let config = load(&vars).unwrap();

        let DatabaseConfig::Mongo { credentials, .. } = &config.database else {
            panic!("expected mongo");
        };
        let (user, password) = credentials.as_ref().unwrap();
        assert_eq!(user, "maker");
        assert_eq!(password.expose(), "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn cosmos_shared_key() {
        let config = load(&cosmos(&[("ORDER_DB_PASSWORD", "a2V5")])).unwrap();

        let DatabaseConfig::Cosmos {
            endpoint,
            container,
            partition_key,
            partition_value,
            auth,
            ..
        } = &config.database
        else {
            panic!("expected cosmos");
        };
        assert_eq!(endpoint, "https://acct.documents.azure.com/");
        assert_eq!(container, "orders");
        assert_eq!(partition_key, "storeId");
        assert_eq!(partition_value, "pets");
        assert!(matches!(auth, CosmosAuth::SharedKey(key) if key.expose() == "a2V5"));
        assert_eq!(config.database.backend(), "cosmosdbsql");
    }

    #[test]
    fn cosmos_requires_partition_and_key() {
        let vars: Vec<_> = cosmos(&[("ORDER_DB_PASSWORD", "a2V5")])
            .into_iter()
            .filter(|(k, _)| *k != "ORDER_DB_PARTITION_VALUE")
            .collect();
        assert_eq!(
            load(&vars).unwrap_err().to_string(),
            "ORDER_DB_PARTITION_VALUE is not set"
        );

        assert_eq!(
            load(&cosmos(&[])).unwrap_err().to_string(),
            "ORDER_DB_PASSWORD is not set"
        );
    }

    #[test]
    fn cosmos_workload_identity() {
        let config = load(&cosmos(&[
            ("USE_WORKLOAD_IDENTITY_AUTH", "TRUE"),
            ("AZURE_CLIENT_ID", "client"),
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_FEDERATED_TOKEN_FILE", "/var/run/secrets/token"),
        ]))
        .unwrap();

        let DatabaseConfig::Cosmos { auth, .. } = config.database else {
            panic!("expected cosmos");
        };
        let CosmosAuth::WorkloadIdentity {
            client_id,
            tenant_id,
            token_file,
            authority_host,
        } = auth
        else {
            panic!("expected workload identity");
        };
        assert_eq!(client_id, "client");
        assert_eq!(tenant_id, "tenant");
        assert_eq!(token_file, PathBuf::from("/var/run/secrets/token"));
        assert_eq!(authority_host, DEFAULT_AUTHORITY_HOST);
    }

    #[test]
    fn workload_identity_flag_must_be_boolean() {
        let err = load(&cosmos(&[("USE_WORKLOAD_IDENTITY_AUTH", "yes")])).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "USE_WORKLOAD_IDENTITY_AUTH",
                ..
            }
        ));
    }

    #[test]
    fn queue_and_server_overrides() {
        let mut vars = MONGO.to_vec();
        vars.extend_from_slice(&[
            ("ORDER_QUEUE_BROKERS", "redpanda:9092"),
            ("ORDER_QUEUE_NAME", "pet-orders"),
            ("ORDER_QUEUE_BATCH_SIZE", "50"),
            ("ORDER_QUEUE_POLL_TIMEOUT_MS", "1000"),
            ("ORDER_QUEUE_SECURITY_PROTOCOL", "SASL_SSL"),
            ("ORDER_QUEUE_SASL_MECHANISM", "PLAIN"),
            ("ORDER_QUEUE_USERNAME", "$ConnectionString"),
            ("ORDER_QUEUE_PASSWORD", "Endpoint=sb://x"),
            ("PORT", "8080"),
            ("APP_VERSION", "0.4.2"),
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("METRICS_PORT", "9000"),
        ]);

        let config = load(&vars).unwrap();

        assert_eq!(config.queue.brokers, "redpanda:9092");
        assert_eq!(config.queue.topic, "pet-orders");
        assert_eq!(config.queue.batch_size, 50);
        assert_eq!(config.queue.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.queue.security_protocol.as_deref(), Some("SASL_SSL"));
        let (mechanism, user, password) = config.queue.sasl.as_ref().unwrap();
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(user, "$ConnectionString");
        assert_eq!(password.expose(), "Endpoint=sb://x");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.version, "0.4.2");
        assert_eq!(config.server.request_timeout, Duration::from_secs(5));
        assert_eq!(config.server.metrics_port, Some(9000));
    }

    #[test]
    fn invalid_port_is_reported() {
        let mut vars = MONGO.to_vec();
        vars.push(("PORT", "http"));

        let err = load(&vars).unwrap_err();

        assert!(matches!(
            &err,
            ConfigError::Invalid { name: "PORT", value, .. } if value == "http"
        ));
    }
}

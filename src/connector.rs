//! Engine connector: client construction, version probing, and collection
//! discovery.

use crate::error::TapError;
use crate::types::EngineVersion;
use bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use regex::Regex;
use std::time::Duration;
use tokio::sync::OnceCell;

/// A connected MongoDB/DocumentDB client scoped to one database.
///
/// Constructed once per run and shared by every stream. The server version is
/// probed on first use and cached for the lifetime of the connector.
pub struct MongoConnector {
    client: Client,
    database: String,
    version: OnceCell<EngineVersion>,
}

impl MongoConnector {
    /// Build a client from a connection URI.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, TapError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|err| TapError::CannotConnect(err.to_string()))?;
        // Bounded timeouts so a bad URI fails instead of hanging.
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options)
            .map_err(|err| TapError::CannotConnect(err.to_string()))?;

        Ok(Self {
            client,
            database: database.to_string(),
            version: OnceCell::new(),
        })
    }

    /// The server version, probed via `buildInfo` on first call.
    pub async fn version(&self) -> Result<EngineVersion, TapError> {
        self.version
            .get_or_try_init(|| async {
                let reply = self
                    .client
                    .database("admin")
                    .run_command(doc! {"buildInfo": 1})
                    .await
                    .map_err(|err| TapError::CannotConnect(err.to_string()))?;
                let raw = reply.get_str("version").map_err(|_| {
                    TapError::CannotConnect("buildInfo reply carries no version".to_string())
                })?;
                let version = EngineVersion::parse(raw).ok_or_else(|| {
                    TapError::CannotConnect(format!("unparseable server version '{raw}'"))
                })?;
                tracing::debug!("probed server version {version} (raw '{raw}')");
                Ok(version)
            })
            .await
            .copied()
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database().collection(name)
    }

    /// Run a command against the admin database. Used for
    /// `modifyChangeStreams` on DocumentDB, which requires elevated
    /// privileges.
    pub async fn admin_command(&self, command: Document) -> mongodb::error::Result<Document> {
        self.client.database("admin").run_command(command).await
    }

    /// List readable collections, filtered by the configured name patterns.
    ///
    /// Patterns match case-insensitively against the whole name; an empty
    /// pattern list selects everything. Collections the authenticated user
    /// cannot read (detected by a single-document probe) are skipped rather
    /// than failing discovery.
    pub async fn discover_collection_names(
        &self,
        filter_patterns: &[String],
    ) -> anyhow::Result<Vec<String>> {
        let patterns = filter_patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i)^{pattern}$")).map_err(|err| {
                    TapError::InvalidConfig(format!(
                        "bad filter_collections pattern '{pattern}': {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut names = self.database().list_collection_names().await?;
        names.sort();

        let mut discovered = Vec::new();
        for name in names {
            if !patterns.is_empty() && !patterns.iter().any(|p| p.is_match(&name)) {
                tracing::debug!(
                    "collection {}.{name} does not match filter_collections, skipping",
                    self.database
                );
                continue;
            }
            match self.collection(&name).find_one(doc! {}).await {
                Ok(_) => {
                    tracing::info!("discovered collection {}.{name}", self.database);
                    discovered.push(name);
                }
                Err(err) => {
                    tracing::info!(
                        "skipping collection {}.{name}: not readable by the authenticated user ({err})",
                        self.database
                    );
                }
            }
        }
        Ok(discovered)
    }
}

//! Tap driver: wires config, catalog, and state to the message stream.

use crate::config::TapConfig;
use crate::connector::MongoConnector;
use crate::schema::stream_schema;
use crate::stream::{CollectionStream, REPLICATION_KEY};
use anyhow::Context;
use singer::{Catalog, CatalogEntry, Message, MessageWriter, State};

/// Extract every selected stream in the catalog, emitting SCHEMA, RECORD,
/// and STATE messages to `writer`. Streams run sequentially; the state
/// document is checkpointed after each stream completes.
pub async fn run_sync<W: MessageWriter>(
    config: &TapConfig,
    catalog: Catalog,
    mut state: State,
    writer: &mut W,
) -> anyhow::Result<()> {
    let uri = config.connection_uri()?;
    let connector = MongoConnector::connect(&uri, &config.database).await?;
    let version = connector.version().await?;
    tracing::info!(
        "connected to MongoDB server version {version}, database '{}'",
        config.database
    );

    for entry in catalog.streams {
        if !entry.selected() {
            tracing::debug!("stream '{}' is not selected, skipping", entry.tap_stream_id);
            continue;
        }
        let stream = CollectionStream::new(&connector, config, entry);
        let emitted = stream
            .sync(&mut state, writer)
            .await
            .with_context(|| format!("replicating stream '{}'", stream.stream_id()))?;
        tracing::info!("stream '{}' emitted {emitted} records", stream.stream_id());
        writer.write_message(&Message::State {
            value: state.to_value(),
        })?;
    }
    Ok(())
}

/// Discover the readable collections of the configured database and produce
/// a catalog with one entry per collection.
pub async fn run_discovery(config: &TapConfig) -> anyhow::Result<Catalog> {
    let uri = config.connection_uri()?;
    let connector = MongoConnector::connect(&uri, &config.database).await?;
    let names = connector
        .discover_collection_names(&config.filter_collections)
        .await?;
    Ok(Catalog {
        streams: names
            .iter()
            .map(|name| discovered_entry(config, name))
            .collect(),
    })
}

/// The unique stream id: `{prefix}_{database}_{collection}`, lowercased.
pub fn stream_id(prefix: &str, database: &str, collection: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    parts.push(database);
    parts.push(collection);
    parts.join("_").to_lowercase()
}

/// Catalog entry for a discovered collection. Replication method is left for
/// the user to choose when editing the catalog.
pub fn discovered_entry(config: &TapConfig, collection_name: &str) -> CatalogEntry {
    let tap_stream_id = stream_id(&config.prefix, &config.database, collection_name);
    let schema = stream_schema();
    let key_properties = vec!["object_id".to_string()];
    let metadata = CatalogEntry::standard_metadata(&schema, collection_name, &key_properties);
    CatalogEntry {
        stream: Some(tap_stream_id.clone()),
        tap_stream_id,
        table_name: collection_name.to_string(),
        schema,
        replication_method: None,
        replication_key: Some(REPLICATION_KEY.to_string()),
        key_properties,
        metadata,
        state_partitioning_keys: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TapConfig;

    fn test_config(prefix: &str) -> TapConfig {
        TapConfig::from_json(&format!(
            r#"{{"database": "Orders", "mongodb_connection_string": "mongodb://localhost:27017", "prefix": "{prefix}"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_stream_id_is_lowercased_and_prefixed() {
        assert_eq!(stream_id("", "Orders", "Items"), "orders_items");
        assert_eq!(stream_id("prod", "Orders", "Items"), "prod_orders_items");
    }

    #[test]
    fn test_discovered_entry_shape() {
        let entry = discovered_entry(&test_config("stage"), "LineItems");
        assert_eq!(entry.tap_stream_id, "stage_orders_lineitems");
        assert_eq!(entry.table_name, "LineItems");
        assert_eq!(entry.replication_method, None);
        assert_eq!(entry.replication_key.as_deref(), Some("replication_key"));
        assert_eq!(entry.key_properties, vec!["object_id"]);
        assert!(entry
            .schema
            .get("properties")
            .and_then(|p| p.get("replication_key"))
            .is_some());
        // A stream-level metadata entry plus one per schema property.
        assert!(entry.metadata.len() > 1);
    }
}

use async_trait::async_trait;
use mirror_core::{eq_filter, Record, RestClient, RestError};
use tracing::{debug, info};

use super::{key_values, validate_identifier, BackendError, BackendKind, BackendResult, Row, TableBackend};
use crate::tables::CREATED_AT;

/// REST table backend over [`RestClient`]
pub struct RestBackend {
    client: RestClient,
}

impl RestBackend {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    async fn find(&self, table: &str, key: &[(&str, &str)]) -> BackendResult<Option<Record>> {
        self.client
            .find_record(table, &eq_filter(key))
            .await
            .map_err(|e| map_error(table, e))
    }
}

#[async_trait]
impl TableBackend for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Rest
    }

    async fn select(&self, table: &str, columns: &[&str]) -> BackendResult<Vec<Row>> {
        validate_identifier(table)?;

        // Records only deserialize with their id, so always ask for it
        let mut fields = columns.to_vec();
        if !fields.contains(&"id") {
            fields.push("id");
        }
        let fields = fields.join(",");

        let records = self
            .client
            .get_all_records(table, Some(&fields))
            .await
            .map_err(|e| map_error(table, e))?;

        Ok(records
            .into_iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| {
                        let value = record.fields.get(*column).cloned().unwrap_or_default();
                        (column.to_string(), value)
                    })
                    .collect()
            })
            .collect())
    }

    async fn upsert_by_key(&self, table: &str, key_columns: &[&str], mut row: Row) -> BackendResult<()> {
        validate_identifier(table)?;

        let existing = {
            let key = key_values(table, key_columns, &row)?;
            self.find(table, &key).await?
        };

        match existing {
            Some(record) => {
                row.remove(CREATED_AT);
                debug!("Updating record {} in {}", record.id, table);
                self.client
                    .update_record(table, &record.id, &row)
                    .await
                    .map_err(|e| map_error(table, e))?;
            }
            None => {
                debug!("Creating record in {}", table);
                self.client
                    .create_record(table, &row)
                    .await
                    .map_err(|e| map_error(table, e))?;
            }
        }

        Ok(())
    }

    async fn delete_by_key(&self, table: &str, key: &Row) -> BackendResult<u64> {
        validate_identifier(table)?;

        let columns: Vec<&str> = key.keys().map(String::as_str).collect();
        let pairs = key_values(table, &columns, key)?;

        match self.find(table, &pairs).await? {
            Some(record) => {
                self.client
                    .delete_record(table, &record.id)
                    .await
                    .map_err(|e| map_error(table, e))?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn raw_execute(&self, _statement: &str) -> BackendResult<u64> {
        Err(BackendError::Unsupported {
            backend: BackendKind::Rest,
            operation: "raw_execute",
        })
    }

    async fn close(&self) {
        self.client.auth.write().await.logout().await;
        info!("REST backend closed");
    }
}

fn map_error(table: &str, error: RestError) -> BackendError {
    if error.is_connection_failure() {
        return BackendError::Unavailable(error.to_string());
    }

    match error {
        RestError::NotFound => BackendError::MissingTable(table.to_string()),
        source => BackendError::Rest {
            table: table.to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestStore;
    use crate::testing::RestStub;
    use mirror_core::RestClientBuilder;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn unreachable_backend() -> RestBackend {
        let client = RestClientBuilder::new("http://127.0.0.1:9")
            .connect_timeout(Duration::from_millis(200))
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        RestBackend::new(client)
    }

    #[test]
    fn test_not_found_maps_to_missing_table() {
        let err = map_error("images", RestError::NotFound);
        assert!(matches!(err, BackendError::MissingTable(ref t) if t == "images"));
    }

    #[test]
    fn test_gateway_errors_map_to_unavailable() {
        let err = map_error(
            "images",
            RestError::Server {
                status: 503,
                message: "down".into(),
            },
        );
        assert!(matches!(err, BackendError::Unavailable(_)));

        let err = map_error("images", RestError::Validation("bad".into()));
        assert!(matches!(err, BackendError::Rest { .. }));
    }

    #[tokio::test]
    async fn test_raw_execute_unsupported() {
        let backend = unreachable_backend();
        let err = backend.raw_execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, BackendError::Unsupported { backend: BackendKind::Rest, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let backend = unreachable_backend();
        let err = backend.select("config_files", &["filename", "hash"]).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));

        let mut key = Row::new();
        key.insert("filename".into(), json!("a.json"));
        let err = backend.delete_by_key("config_files", &key).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    fn key(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_select_projects_columns_and_requests_id() {
        let stub = RestStub::start(&["sync_manifest"]).await;
        stub.seed(
            "sync_manifest",
            json!({"path": "config/a.json", "hash": "h1", "table_name": "config_files", "last_synced": "2024-05-01T10:00:00Z"}),
        );
        stub.seed(
            "sync_manifest",
            json!({"path": "data/b.json", "hash": "h2", "table_name": "data_files", "last_synced": "2024-05-01T10:00:00Z"}),
        );

        let rows = stub.backend().select("sync_manifest", &["path", "hash"]).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["path"], "config/a.json");
        assert_eq!(rows[1]["hash"], "h2");
        assert!(rows.iter().all(|row| row.len() == 2));

        let requests = stub.requests();
        let fields = requests[0].query.get("fields").unwrap();
        assert_eq!(fields, "path,hash,id");
    }

    #[tokio::test]
    async fn test_manifest_reads_over_rest() {
        let stub = RestStub::start(&["sync_manifest"]).await;
        stub.seed(
            "sync_manifest",
            json!({"path": "config/a.json", "hash": "h1", "table_name": "config_files", "last_synced": "2024-05-01T10:00:00Z"}),
        );

        let store = ManifestStore::new(std::sync::Arc::new(stub.backend()));
        let entries = store.read_all().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "config/a.json");
        assert_eq!(entries[0].table_name, "config_files");
    }

    #[tokio::test]
    async fn test_missing_collection_is_missing_table() {
        let stub = RestStub::start(&[]).await;
        let err = stub.backend().select("sync_manifest", &["path"]).await.unwrap_err();
        assert!(err.is_missing_table());

        let store = ManifestStore::new(std::sync::Arc::new(stub.backend()));
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_keeping_created_at() {
        let stub = RestStub::start(&["config_files"]).await;
        let backend = stub.backend();

        let row = |hash: &str, stamp: &str| {
            key(&[
                ("filename", "a.json"),
                ("path", "config/a.json"),
                ("hash", hash),
                ("created_at", stamp),
                ("updated_at", stamp),
            ])
        };

        backend
            .upsert_by_key("config_files", &["filename"], row("h1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        backend
            .upsert_by_key("config_files", &["filename"], row("h2", "2024-02-01T00:00:00Z"))
            .await
            .unwrap();

        let records = stub.records("config_files");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["hash"], "h2");
        assert_eq!(records[0]["created_at"], "2024-01-01T00:00:00Z");
        assert_eq!(records[0]["updated_at"], "2024-02-01T00:00:00Z");

        let requests = stub.requests();
        let methods: Vec<_> = requests.iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["GET", "POST", "GET", "PATCH"]);
        assert_eq!(requests[0].query.get("filter").unwrap(), "filename = \"a.json\"");
        assert_eq!(requests[0].query.get("perPage").unwrap(), "1");

        let patch = &requests[3];
        assert_eq!(patch.id.as_deref(), records[0]["id"].as_str());
        assert!(!patch.body.as_ref().unwrap().contains_key("created_at"));
    }

    #[tokio::test]
    async fn test_upsert_composite_key() {
        let stub = RestStub::start(&["collections"]).await;
        stub.seed(
            "collections",
            json!({"language": "en", "doc_type": "data", "filename": "skills.json", "hash": "h1"}),
        );
        let backend = stub.backend();

        let row = key(&[("language", "fr"), ("doc_type", "data"), ("filename", "skills.json"), ("hash", "h2")]);
        backend
            .upsert_by_key("collections", &["language", "doc_type", "filename"], row)
            .await
            .unwrap();

        // Different language, so a second record
        assert_eq!(stub.records("collections").len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_key() {
        let stub = RestStub::start(&["config_files"]).await;
        stub.seed("config_files", json!({"filename": "a.json", "path": "config/a.json", "hash": "h1"}));
        let backend = stub.backend();

        // Key matches but the row belongs to another path
        let other = key(&[("filename", "a.json"), ("path", "site/config/a.json")]);
        assert_eq!(backend.delete_by_key("config_files", &other).await.unwrap(), 0);
        assert_eq!(stub.records("config_files").len(), 1);

        let own = key(&[("filename", "a.json"), ("path", "config/a.json")]);
        assert_eq!(backend.delete_by_key("config_files", &own).await.unwrap(), 1);
        assert!(stub.records("config_files").is_empty());
        assert_eq!(backend.delete_by_key("config_files", &own).await.unwrap(), 0);

        let deletes: Vec<_> = stub.requests().into_iter().filter(|r| r.method == "DELETE").collect();
        assert_eq!(deletes.len(), 1);
    }

    #[tokio::test]
    async fn test_service_key_sent_as_bearer() {
        let stub = RestStub::start(&["images"]).await;
        let mut client = RestClient::new(stub.url()).unwrap();
        client.use_service_key("service-secret").await;

        RestBackend::new(client).select("images", &["filename"]).await.unwrap();

        assert_eq!(
            stub.requests()[0].authorization.as_deref(),
            Some("Bearer service-secret")
        );
    }
}

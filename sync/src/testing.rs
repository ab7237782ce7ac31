//! Shared fixtures for unit and integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use mirror_core::RestClient;
use serde_json::{json, Value};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use tokio::net::TcpListener;

use crate::backend::{
    BackendError, BackendKind, BackendResult, RestBackend, Row, SqlBackend, SqlDialect, TableBackend,
};
use crate::tables::{schema_statements, MANIFEST_TABLE};

/// Route engine logs to the test harness; safe to call from every test
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mirror_sync=debug")
        .with_test_writer()
        .try_init();
}

/// In-memory SQLite backend with the full schema created
pub(crate) async fn sqlite_backend() -> Arc<dyn TableBackend> {
    install_default_drivers();

    // One connection that never expires, or the in-memory database vanishes
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let backend = SqlBackend::from_pool(pool, SqlDialect::Sqlite);
    for statement in schema_statements() {
        backend.raw_execute(&statement).await.unwrap();
    }

    Arc::new(backend)
}

pub(crate) async fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, content).await.unwrap();
}

/// Backend that fails destination writes for chosen paths and records
/// every destination write it sees
pub(crate) struct FlakyBackend {
    inner: Arc<dyn TableBackend>,
    failing_paths: Vec<String>,
    attempted: Mutex<Vec<String>>,
}

impl FlakyBackend {
    pub(crate) fn new(inner: Arc<dyn TableBackend>, failing_paths: &[&str]) -> Self {
        Self {
            inner,
            failing_paths: failing_paths.iter().map(|p| p.to_string()).collect(),
            attempted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attempted(&self) -> Vec<String> {
        let mut attempted = self.attempted.lock().unwrap().clone();
        attempted.sort();
        attempted
    }
}

#[async_trait]
impl TableBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn select(&self, table: &str, columns: &[&str]) -> BackendResult<Vec<Row>> {
        self.inner.select(table, columns).await
    }

    async fn upsert_by_key(&self, table: &str, key_columns: &[&str], row: Row) -> BackendResult<()> {
        if table != MANIFEST_TABLE {
            let path = row.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            self.attempted.lock().unwrap().push(path.clone());

            if self.failing_paths.contains(&path) {
                return Err(BackendError::query(table, format!("injected failure for {}", path)));
            }
        }

        self.inner.upsert_by_key(table, key_columns, row).await
    }

    async fn delete_by_key(&self, table: &str, key: &Row) -> BackendResult<u64> {
        self.inner.delete_by_key(table, key).await
    }

    async fn raw_execute(&self, statement: &str) -> BackendResult<u64> {
        self.inner.raw_execute(statement).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// One request seen by [`RestStub`]
#[derive(Debug, Clone)]
pub(crate) struct StubRequest {
    pub method: &'static str,
    pub table: String,
    pub id: Option<String>,
    pub query: HashMap<String, String>,
    pub body: Option<Row>,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct StubState {
    tables: HashMap<String, Vec<Row>>,
    requests: Vec<StubRequest>,
    next_id: u64,
}

type SharedStub = Arc<Mutex<StubState>>;

/// In-process records API answering like PocketBase: paged lists with
/// `filter` and `fields` projection, create, patch and delete by id.
/// Unknown tables answer 404.
pub(crate) struct RestStub {
    addr: SocketAddr,
    state: SharedStub,
}

impl RestStub {
    pub(crate) async fn start(tables: &[&str]) -> Self {
        let state: SharedStub = Arc::new(Mutex::new(StubState::default()));
        {
            let mut guard = state.lock().unwrap();
            for table in tables {
                guard.tables.insert(table.to_string(), Vec::new());
            }
        }

        let app = Router::new()
            .route("/api/collections/:table/records", get(list_records).post(create_record))
            .route(
                "/api/collections/:table/records/:id",
                patch(update_record).delete(delete_record),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn backend(&self) -> RestBackend {
        RestBackend::new(RestClient::new(self.url()).unwrap())
    }

    /// Insert a record directly, returning its id
    pub(crate) fn seed(&self, table: &str, fields: Value) -> String {
        let mut guard = self.state.lock().unwrap();
        let Value::Object(fields) = fields else {
            panic!("seed records must be JSON objects");
        };
        guard.insert(table, fields).unwrap()
    }

    pub(crate) fn records(&self, table: &str) -> Vec<Row> {
        self.state.lock().unwrap().tables.get(table).cloned().unwrap_or_default()
    }

    pub(crate) fn requests(&self) -> Vec<StubRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl StubState {
    fn insert(&mut self, table: &str, mut fields: Row) -> Option<String> {
        self.next_id += 1;
        let id = format!("rec{:05}", self.next_id);
        fields.insert("id".into(), Value::String(id.clone()));
        self.tables.get_mut(table)?.push(fields);
        Some(id)
    }

    fn record(&mut self, request: StubRequest) {
        self.requests.push(request);
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": 404, "message": "The requested resource wasn't found.", "data": {}})),
    )
        .into_response()
}

/// Parse `a = "x" && b = "y"` into field/value pairs
fn parse_filter(filter: &str) -> Vec<(String, String)> {
    filter
        .split(" && ")
        .filter_map(|clause| {
            let (field, value) = clause.split_once(" = ")?;
            let value = value.strip_prefix('"')?.strip_suffix('"')?;
            Some((field.to_string(), value.replace("\\\"", "\"").replace("\\\\", "\\")))
        })
        .collect()
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn list_records(
    State(state): State<SharedStub>,
    AxumPath(table): AxumPath<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().unwrap();
    guard.record(StubRequest {
        method: "GET",
        table: table.clone(),
        id: None,
        query: query.clone(),
        body: None,
        authorization: authorization(&headers),
    });

    let Some(records) = guard.tables.get(&table) else {
        return not_found();
    };

    let conditions = query.get("filter").map(|f| parse_filter(f)).unwrap_or_default();
    let matching: Vec<&Row> = records
        .iter()
        .filter(|record| {
            conditions
                .iter()
                .all(|(field, value)| record.get(field).and_then(|v| v.as_str()) == Some(value.as_str()))
        })
        .collect();

    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    let per_page: usize = query.get("perPage").and_then(|p| p.parse().ok()).unwrap_or(30).max(1);
    let total_items = matching.len();
    let total_pages = total_items.div_ceil(per_page);

    let fields: Option<Vec<&str>> = query.get("fields").map(|f| f.split(',').collect());
    let items: Vec<Value> = matching
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|record| {
            let projected: Row = match &fields {
                Some(fields) => record
                    .iter()
                    .filter(|(key, _)| fields.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
                None => record.clone(),
            };
            Value::Object(projected)
        })
        .collect();

    Json(json!({
        "page": page,
        "perPage": per_page,
        "totalItems": total_items,
        "totalPages": total_pages,
        "items": items,
    }))
    .into_response()
}

async fn create_record(
    State(state): State<SharedStub>,
    AxumPath(table): AxumPath<String>,
    headers: HeaderMap,
    Json(body): Json<Row>,
) -> Response {
    let mut guard = state.lock().unwrap();
    guard.record(StubRequest {
        method: "POST",
        table: table.clone(),
        id: None,
        query: HashMap::new(),
        body: Some(body.clone()),
        authorization: authorization(&headers),
    });

    match guard.insert(&table, body.clone()) {
        Some(id) => {
            let mut created = body;
            created.insert("id".into(), Value::String(id));
            Json(Value::Object(created)).into_response()
        }
        None => not_found(),
    }
}

async fn update_record(
    State(state): State<SharedStub>,
    AxumPath((table, id)): AxumPath<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Row>,
) -> Response {
    let mut guard = state.lock().unwrap();
    guard.record(StubRequest {
        method: "PATCH",
        table: table.clone(),
        id: Some(id.clone()),
        query: HashMap::new(),
        body: Some(body.clone()),
        authorization: authorization(&headers),
    });

    let existing = guard
        .tables
        .get_mut(&table)
        .and_then(|records| records.iter_mut().find(|r| r.get("id") == Some(&Value::String(id.clone()))));
    match existing {
        Some(record) => {
            for (key, value) in body {
                record.insert(key, value);
            }
            Json(Value::Object(record.clone())).into_response()
        }
        None => not_found(),
    }
}

async fn delete_record(
    State(state): State<SharedStub>,
    AxumPath((table, id)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().unwrap();
    guard.record(StubRequest {
        method: "DELETE",
        table: table.clone(),
        id: Some(id.clone()),
        query: HashMap::new(),
        body: None,
        authorization: authorization(&headers),
    });

    let Some(records) = guard.tables.get_mut(&table) else {
        return not_found();
    };
    let before = records.len();
    records.retain(|r| r.get("id") != Some(&Value::String(id.clone())));
    if records.len() == before {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

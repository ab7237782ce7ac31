use std::sync::Arc;
use std::time::Duration;

use mirror_core::RestConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{BackendError, BackendKind, BackendResult, RestBackend, SqlBackend, TableBackend};

/// Connection settings for both drivers. SQL wins when both are usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub rest_url: Option<String>,
    pub service_key: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            rest_url: None,
            service_key: None,
            admin_email: None,
            admin_password: None,
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn rest_config(&self) -> Option<RestConfig> {
        self.rest_url.as_ref().map(|base_url| RestConfig {
            base_url: base_url.clone(),
            service_key: self.service_key.clone(),
            admin_email: self.admin_email.clone(),
            admin_password: self.admin_password.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

/// Pick the SQL driver when a database URL works, otherwise the REST driver
pub async fn select_backend(config: &BackendConfig) -> BackendResult<Arc<dyn TableBackend>> {
    let mut last_error = None;

    if let Some(url) = &config.database_url {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        match SqlBackend::connect(url, config.max_connections, timeout).await {
            Ok(backend) => return Ok(Arc::new(backend)),
            Err(e) => {
                warn!("SQL backend unavailable, trying REST: {}", e);
                last_error = Some(e.to_string());
            }
        }
    }

    if let Some(rest) = config.rest_config() {
        match connect_rest(&rest).await {
            Ok(backend) => return Ok(Arc::new(backend)),
            Err(e) => {
                warn!("REST backend unavailable: {}", e);
                last_error = Some(e.to_string());
            }
        }
    }

    Err(BackendError::Unavailable(
        last_error.unwrap_or_else(|| "no database URL or REST URL configured".to_string()),
    ))
}

async fn connect_rest(config: &RestConfig) -> BackendResult<RestBackend> {
    let unavailable = |e: mirror_core::RestError| BackendError::Unavailable(e.to_string());

    let client = config.connect().await.map_err(unavailable)?;
    client.health_check().await.map_err(unavailable)?;

    info!("Connected to REST table service at {}", client.base_url());
    Ok(RestBackend::new(client))
}

/// Observable lifecycle of a [`BackendHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    SqlConnected,
    RestConnected,
    Closed,
}

enum Slot {
    Uninitialized,
    Connected(Arc<dyn TableBackend>),
    Closed,
}

/// Owner of the process-wide backend.
///
/// `uninitialized -> sql-connected | rest-connected -> closed`, with no
/// reconnect once closed.
pub struct BackendHandle {
    config: BackendConfig,
    slot: RwLock<Slot>,
}

impl BackendHandle {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(Slot::Uninitialized),
        }
    }

    /// A handle already connected to `backend`
    pub fn with_backend(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            config: BackendConfig::default(),
            slot: RwLock::new(Slot::Connected(backend)),
        }
    }

    /// Select and connect a backend. Connecting twice returns the same one.
    pub async fn connect(&self) -> BackendResult<Arc<dyn TableBackend>> {
        let mut slot = self.slot.write().await;

        match &*slot {
            Slot::Connected(backend) => Ok(backend.clone()),
            Slot::Closed => Err(BackendError::Unavailable("backend handle is closed".to_string())),
            Slot::Uninitialized => {
                let backend = select_backend(&self.config).await?;
                info!("Backend connected ({})", backend.kind());
                *slot = Slot::Connected(backend.clone());
                Ok(backend)
            }
        }
    }

    /// The connected backend
    pub async fn get(&self) -> BackendResult<Arc<dyn TableBackend>> {
        match &*self.slot.read().await {
            Slot::Connected(backend) => Ok(backend.clone()),
            Slot::Uninitialized => Err(BackendError::Unavailable("backend not connected".to_string())),
            Slot::Closed => Err(BackendError::Unavailable("backend handle is closed".to_string())),
        }
    }

    pub async fn state(&self) -> BackendState {
        match &*self.slot.read().await {
            Slot::Uninitialized => BackendState::Uninitialized,
            Slot::Connected(backend) => match backend.kind() {
                BackendKind::Sql => BackendState::SqlConnected,
                BackendKind::Rest => BackendState::RestConnected,
            },
            Slot::Closed => BackendState::Closed,
        }
    }

    pub async fn kind(&self) -> Option<BackendKind> {
        match &*self.slot.read().await {
            Slot::Connected(backend) => Some(backend.kind()),
            _ => None,
        }
    }

    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.slot.write().await, Slot::Closed);
        if let Slot::Connected(backend) = previous {
            backend.close().await;
        }
    }
}

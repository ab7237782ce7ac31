use super::{auth::AuthManager, crud::CrudOperations, error::*, types::*};
use reqwest::ClientBuilder;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Main REST table API client
pub struct RestClient {
    /// Authentication manager for handling tokens and refresh
    pub auth: Arc<RwLock<AuthManager>>,

    /// CRUD operations for table records
    pub crud: CrudOperations,

    /// HTTP client for making requests
    http_client: reqwest::Client,

    /// Base URL of the table service
    base_url: String,
}

impl RestClient {
    /// Create a new client
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("content-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RestError::Network)?;

        Ok(Self::with_client(base_url, http_client))
    }

    /// Create a new client with custom HTTP client configuration
    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let auth_manager = Arc::new(RwLock::new(AuthManager::new(http_client.clone(), base_url.clone())));
        let crud_operations = CrudOperations::new(http_client.clone(), base_url.clone(), auth_manager.clone());

        Self {
            auth: auth_manager,
            crud: crud_operations,
            http_client,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a static service credential with every request
    pub async fn use_service_key(&mut self, key: impl Into<String>) {
        self.auth.write().await.use_service_key(key.into()).await;
        info!("Configured service credential");
    }

    /// Authenticate as admin
    pub async fn authenticate_admin(
        &mut self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthToken> {
        let auth_token = self
            .auth
            .write()
            .await
            .authenticate_admin(email.into(), password.into())
            .await?;

        info!("Successfully authenticated admin");
        Ok(auth_token)
    }

    /// Check if currently authenticated
    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.is_authenticated().await
    }

    /// Logout and clear authentication
    pub async fn logout(&mut self) {
        self.auth.write().await.logout().await;
        info!("Logged out successfully");
    }

    /// Check health of the table service
    pub async fn health_check(&self) -> Result<HealthResponse> {
        debug!("Performing health check");

        let response = self
            .http_client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;

        if response.status().is_success() {
            let health: HealthResponse = response.json().await?;
            debug!("Health check successful: {}", health.message);
            Ok(health)
        } else {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            Err(RestError::Server {
                status,
                message: error_text,
            })
        }
    }
}

// Convenience methods for common operations
impl RestClient {
    pub async fn create_record<T: serde::Serialize>(&self, table: &str, data: &T) -> Result<Record> {
        self.crud.create(table, data).await
    }

    pub async fn update_record<T: serde::Serialize>(&self, table: &str, id: &str, data: &T) -> Result<Record> {
        self.crud.update(table, id, data).await
    }

    pub async fn delete_record(&self, table: &str, id: &str) -> Result<()> {
        self.crud.delete(table, id).await
    }

    pub async fn find_record(&self, table: &str, filter: &str) -> Result<Option<Record>> {
        self.crud.find_first(table, filter).await
    }

    pub async fn get_all_records(&self, table: &str, fields: Option<&str>) -> Result<Vec<Record>> {
        self.crud.get_all(table, fields).await
    }
}

// Builder pattern for client configuration
pub struct RestClientBuilder {
    base_url: String,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl RestClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            connect_timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<RestClient> {
        url::Url::parse(&self.base_url)?;

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        client_builder = client_builder.user_agent(concat!("content-mirror/", env!("CARGO_PKG_VERSION")));

        let http_client = client_builder.build().map_err(RestError::Network)?;

        Ok(RestClient::with_client(self.base_url, http_client))
    }
}

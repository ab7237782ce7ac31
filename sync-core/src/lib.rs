//! REST-style table client
//!
//! This crate provides the HTTP client the content mirror uses when no direct
//! database connection is available: CRUD over table records, service-key or
//! admin authentication, and retry with exponential backoff.

pub mod api;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use api::{
    eq_filter, AuthManager, AuthState, CrudOperations, ListParams, ListResult, Record, RestClient,
    RestClientBuilder, RestError, Result,
};

/// Connection settings for the REST table service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    /// Long-lived service credential sent as a bearer token
    pub service_key: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            service_key: None,
            admin_email: None,
            admin_password: None,
            timeout_secs: 30,
        }
    }
}

impl RestConfig {
    /// Build a client from these settings and authenticate it.
    ///
    /// A service key takes precedence over admin credentials.
    pub async fn connect(&self) -> Result<RestClient> {
        let mut client = RestClientBuilder::new(&self.base_url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.timeout_secs.min(10)))
            .build()?;

        if let Some(key) = &self.service_key {
            client.use_service_key(key.clone()).await;
        } else if let (Some(email), Some(password)) = (&self.admin_email, &self.admin_password) {
            client.authenticate_admin(email.clone(), password.clone()).await?;
        }

        Ok(client)
    }
}

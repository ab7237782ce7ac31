use super::{auth::AuthManager, error::*, types::*};
use backoff::{future::retry, ExponentialBackoff};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct CrudOperations {
    client: reqwest::Client,
    base_url: String,
    auth_manager: Arc<RwLock<AuthManager>>,
}

impl CrudOperations {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        auth_manager: Arc<RwLock<AuthManager>>,
    ) -> Self {
        Self {
            client,
            base_url,
            auth_manager,
        }
    }

    fn records_url(&self, table: &str) -> String {
        format!("{}/api/collections/{}/records", self.base_url, table)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match self.auth_manager.read().await.get_valid_token().await? {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Ok(request),
        }
    }

    /// List records from a table
    pub async fn list<T: DeserializeOwned>(
        &self,
        table: &str,
        params: Option<ListParams>,
    ) -> Result<ListResult<T>> {
        let operation = || async {
            let mut url = self.records_url(table);

            if let Some(params) = &params {
                let query = serde_urlencoded::to_string(params)
                    .map_err(|e| RestError::Validation(e.to_string()))?;
                if !query.is_empty() {
                    url.push('?');
                    url.push_str(&query);
                }
            }

            let request = self.authorize(self.client.get(&url)).await?;
            let response = request.send().await?;
            self.handle_response(response).await
        };

        self.retry_operation(operation).await
    }

    /// Create a new record
    pub async fn create<T: Serialize, R: DeserializeOwned>(&self, table: &str, data: &T) -> Result<R> {
        let operation = || async {
            let url = self.records_url(table);
            let request = self.authorize(self.client.post(&url).json(data)).await?;
            let response = request.send().await?;
            self.handle_response(response).await
        };

        self.retry_operation(operation).await
    }

    /// Update an existing record
    pub async fn update<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
        data: &T,
    ) -> Result<R> {
        let operation = || async {
            let url = format!("{}/{}", self.records_url(table), id);
            let request = self.authorize(self.client.patch(&url).json(data)).await?;
            let response = request.send().await?;
            self.handle_response(response).await
        };

        self.retry_operation(operation).await
    }

    /// Delete a record
    pub async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let operation = || async {
            let url = format!("{}/{}", self.records_url(table), id);
            let request = self.authorize(self.client.delete(&url)).await?;
            let response = request.send().await?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(self.parse_error_response(response).await)
            }
        };

        self.retry_operation(operation).await
    }

    // Helper methods

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if response.status().is_success() {
            let content: T = response.json().await?;
            Ok(content)
        } else {
            Err(self.parse_error_response(response).await)
        }
    }

    async fn parse_error_response(&self, response: reqwest::Response) -> RestError {
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED => RestError::Authentication("Unauthorized".to_string()),
            StatusCode::FORBIDDEN => RestError::Authorization("Forbidden".to_string()),
            StatusCode::NOT_FOUND => RestError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                RestError::RateLimit { retry_after }
            }
            status if status.is_client_error() => {
                let error_text = response.text().await.unwrap_or_default();

                if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                    RestError::Validation(error_response.message)
                } else {
                    RestError::Server {
                        status: status.as_u16(),
                        message: error_text,
                    }
                }
            }
            status if status.is_server_error() => {
                let error_text = response.text().await.unwrap_or_default();
                RestError::Server {
                    status: status.as_u16(),
                    message: error_text,
                }
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                RestError::Unknown(error_text)
            }
        }
    }

    async fn retry_operation<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        retry(backoff, || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(error) => {
                    if error.is_retryable() && !error.is_connection_failure() {
                        warn!("Retryable error occurred: {}", error);
                        Err(backoff::Error::transient(error))
                    } else {
                        debug!("Non-retryable error: {}", error);
                        Err(backoff::Error::permanent(error))
                    }
                }
            }
        })
        .await
    }
}

// Convenience functions for common record operations
impl CrudOperations {
    /// First record matching a filter, if any
    pub async fn find_first(&self, table: &str, filter: &str) -> Result<Option<Record>> {
        let params = ListParams::new().filter(filter).per_page(1);
        let result: ListResult<Record> = self.list(table, Some(params)).await?;
        Ok(result.items.into_iter().next())
    }

    /// Get all records (with automatic pagination), optionally restricted to some fields
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        table: &str,
        fields: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 1;
        const PER_PAGE: u32 = 200;

        loop {
            let mut params = ListParams::new().page(page).per_page(PER_PAGE);
            if let Some(fields) = fields {
                params = params.fields(fields);
            }

            let result: ListResult<T> = self.list(table, Some(params)).await?;
            all_items.extend(result.items);

            if page >= result.total_pages {
                break;
            }

            page += 1;
        }

        Ok(all_items)
    }
}

/// Build an equality filter joined with `&&`, quoting every value
pub fn eq_filter(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(field, value)| {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{} = \"{}\"", field, escaped)
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_filter_single() {
        assert_eq!(eq_filter(&[("path", "config/a.json")]), "path = \"config/a.json\"");
    }

    #[test]
    fn test_eq_filter_composite_and_escaping() {
        let filter = eq_filter(&[("language", "fr"), ("filename", "say \"hi\".json")]);
        assert_eq!(filter, "language = \"fr\" && filename = \"say \\\"hi\\\".json\"");
    }
}

//! REST table API client module
//!
//! This module wraps a records-over-HTTP API
//! (`/api/collections/{table}/records`) with support for authentication,
//! CRUD operations, automatic retries, and token refresh.

pub mod auth;
pub mod client;
pub mod crud;
pub mod error;
pub mod types;

// Re-export main types for convenience
pub use client::{RestClient, RestClientBuilder};
pub use error::{RestError, Result};
pub use types::*;

pub use auth::{AuthManager, AuthState};
pub use crud::{eq_filter, CrudOperations};

//! Arlo server client utilities.
//!
//! This crate provides the HTTP side of the sync client:
//!
//! - [`ArloClient`], a thin wrapper around a configured `reqwest::Client`
//! - Base URL validation for `ARLO_API_BASE`
//! - Session cookie discovery from `ARLO_SESSION`
//! - Percent-encoded endpoint path builders in [`endpoints`]
//! - The [`Transport`] seam the engine is written against
//!
//! # Example
//!
//! ```ignore
//! use arlo_api::{ApiRequest, ArloClient, Transport, endpoints};
//!
//! async fn status() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ArloClient::from_env()?;
//!     let response = client.execute(ApiRequest::get(endpoints::audit_status("election-1"))).await?;
//!     println!("status: {}", response.status);
//!     Ok(())
//! }
//! ```

mod client;
pub mod endpoints;
mod error;
mod redact;
mod transport;

pub use client::{ArloClient, DEFAULT_API_BASE, validate_base_url};
pub use error::{ClientBuildError, TransportError, TransportErrorKind};
pub use redact::redact_sensitive;
pub use transport::{ApiMethod, ApiRequest, RawResponse, Transport};

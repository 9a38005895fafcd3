//! Provider HTTP client for Courier
//!
//! A thin consumer of the resilient executor: callers supply a provider
//! name (the resource key), a request, and a retry policy, and receive the
//! parsed response or a classified terminal error. Transport and status
//! failures are mapped onto the shared failure kinds so the executor's
//! classifier decides what is worth retrying.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{MockResponse, ProviderClient, ProviderRequest, ProviderResponse};
pub use errors::HttpError;
pub use types::{HttpMethod, HttpMethodError};

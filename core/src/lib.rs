//! Client for the Kayzen reporting API.
//!
//! [`ApiClient`] exchanges an API key and secret for a bearer token, caches it
//! until it expires, and forwards report operations to the REST endpoints.

pub mod client;
pub mod clock;
pub mod error;
pub mod token;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ApiClient, ClientOptions, Credentials, ReportRequest, ResultsWindow};
pub use clock::{Clock, SystemClock};
pub use error::ClientError;
pub use token::TokenPhase;

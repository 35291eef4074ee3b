#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client infrastructure for `authkit`
//!
//! A hyper-based client with:
//! - TLS via rustls (HTTPS only by default)
//! - Connection pooling and per-request timeouts
//! - Response body size limits
//! - A single pluggable auth layer that sees every request and response
//!
//! # Example
//!
//! ```ignore
//! use authkit_http::{HttpClientBuilder, HttpClientConfig};
//!
//! let mut config = HttpClientConfig::default();
//! config.request_timeout = Duration::from_secs(10);
//! let client = HttpClientBuilder::with_config(config).build()?;
//!
//! let data: MyData = client
//!     .get("https://www.googleapis.com/calendar/v3/users/me/calendarList")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod request;
mod response;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TransportSecurity};
pub use error::HttpError;
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};

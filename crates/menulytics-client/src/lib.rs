//! HTTP implementation of [`menulytics_core::analytics::AnalyticsBackend`]
//! that talks to a running `menulytics` ingest server.

pub mod error;
pub mod http;

pub use error::ClientError;
pub use http::HttpBackend;

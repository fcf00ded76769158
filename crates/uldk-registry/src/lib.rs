//! Wire-level client for the ULDK parcel registry.
//!
//! The registry answers three kinds of plain-text queries: listing administrative
//! units under a TERYT code, looking a parcel up by its cadastral id, and finding
//! the parcel under a point. Every response starts with a status line (`"0"` on
//! success) followed by one pipe-delimited record per line.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uldk_registry::{Query, RateLimiter, RegistryConfig, RegistrySearch, UldkPoint, UldkSearch};
//!
//! let config = RegistryConfig::default();
//! let limiter = Arc::new(config.rate_limiter());
//! let search = UldkSearch::parcels(&config, limiter)?;
//!
//! let rows = search.search(&Query::Point(UldkPoint::new(500_000.0, 600_000.0, 2180)))?;
//! println!("{}", rows[0]);
//! # Ok::<(), uldk_registry::RegistryError>(())
//! ```
//!
//! The rate limiter is an explicit object: hand the same `Arc<RateLimiter>` to every
//! client that should share the registry's request budget.

pub mod client;
pub mod config;
pub mod logger;
pub mod query;
pub mod rate_limit;

pub use client::{
    FnSearch, PARCEL_FIELDS, RegistrySearch, UldkSearch, build_url, parse_response, search_fn,
};
pub use config::RegistryConfig;
pub use logger::SearchLogger;
pub use query::{ObjectKind, Query, QueryBatch, QueryKey, UldkPoint};
pub use rate_limit::RateLimiter;

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum RegistryError {
        #[error("No response from the registry: {0}")]
        NoResponse(#[source] reqwest::Error),
        #[error("Registry returned an empty response")]
        EmptyResponse,
        /// Non-zero status line, kept verbatim.
        #[error("Registry error: {0}")]
        Registry(String),
        #[error("HTTP error: {0}")]
        Http(#[from] reqwest::Error),
        #[error("Invalid registry URL: {0}")]
        InvalidUrl(String),
    }

    impl RegistryError {
        /// The registry status string, when the registry itself rejected the query.
        pub fn status(&self) -> Option<&str> {
            match self {
                Self::Registry(status) => Some(status),
                _ => None,
            }
        }
    }

    pub type Result<T> = std::result::Result<T, RegistryError>;
}

pub use error::{RegistryError, Result};

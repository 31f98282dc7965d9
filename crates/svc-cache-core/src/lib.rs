//! Service Cache Core
//!
//! This crate provides the in-memory service instance cache: the table of
//! watched services, the refresh engine, the periodic refresh scheduler and
//! the load-balancing lookup path.

pub mod cache;
pub mod error;
pub mod instance;
pub mod retriever;

pub use cache::{ServiceCache, ServiceSnapshot};
pub use error::{BoxError, CacheError};
pub use instance::Instance;
pub use retriever::{ConsulRetriever, Retriever};

//! Core error types

use thiserror::Error;

/// Opaque error produced by a [`Retriever`](crate::Retriever)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("Could not refresh {0}")]
    Validation(String),

    #[error("Requested unregistered service: {0}")]
    Unregistered(String),

    #[error("Requested service is not available: {service}")]
    Unavailable {
        service: String,
        #[source]
        cause: Option<Box<CacheError>>,
    },

    #[error("Unable to start cache after {attempts} retries")]
    StartFailure { attempts: u32 },
}

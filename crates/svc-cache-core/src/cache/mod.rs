//! Service instance cache
//!
//! This module provides the ServiceCache which handles:
//! - The table of watched services and their instances
//! - Refreshing the table from a Retriever
//! - Periodic refresh scheduling with bounded startup retry
//! - Random instance selection for lookups

mod manager;
mod scheduler;
mod table;

#[cfg(test)]
mod test_support;

pub use manager::ServiceCache;
pub use table::ServiceSnapshot;

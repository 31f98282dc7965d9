//! Service instance model

use serde::{Deserialize, Serialize};

/// One resolved endpoint of a named service
///
/// Instances are value data: the cache shares them behind an `Arc` and
/// replaces them wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Instance {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// `address:port` form used by callers that dial the instance
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

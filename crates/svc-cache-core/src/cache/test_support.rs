//! Retrievers used by the cache tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::BoxError;
use crate::instance::Instance;
use crate::retriever::Retriever;

/// Returns a fixed instance set and counts calls
pub(crate) struct FakeRetriever {
    instances: Vec<Instance>,
    calls: AtomicUsize,
}

impl FakeRetriever {
    pub(crate) fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances,
            calls: AtomicUsize::new(0),
        }
    }

    /// Three instances each of authentication, acl and lecture services
    pub(crate) fn lecture_services() -> Self {
        let mut instances = Vec::new();
        for (range, service, port) in [
            (1..4, "authentication-service", 80),
            (4..7, "acl-service", 8080),
            (7..10, "lecture-service", 80),
        ] {
            for i in range {
                instances.push(
                    Instance::new(i.to_string(), service, format!("192.168.2.{}", i), port)
                        .with_tags(["interactive-lecture", "public"]),
                );
            }
        }
        Self::new(instances)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn fetch(&self, _address: &str) -> Result<Vec<Instance>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.instances.clone())
    }
}

/// Fails a configurable number of times before delegating to a [`FakeRetriever`]
#[derive(Default)]
pub(crate) struct FailingRetriever {
    failures: usize,
    calls: AtomicUsize,
    fallback: Option<FakeRetriever>,
}

impl FailingRetriever {
    /// Fail the first `failures` calls, then return the lecture services
    pub(crate) fn recovering_after(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            fallback: Some(FakeRetriever::lecture_services()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FailingRetriever {
    async fn fetch(&self, address: &str) -> Result<Vec<Instance>, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fallback {
            Some(fallback) if call >= self.failures => fallback.fetch(address).await,
            _ => Err(format!("connection refused: {}", address).into()),
        }
    }
}

//! Table of watched services and their known instances

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::instance::Instance;

/// Point-in-time view of one watched service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service: String,
    pub instance_count: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TableState {
    services: BTreeMap<String, Vec<Arc<Instance>>>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Mapping from watched service name to its current instances
///
/// All access goes through a single read-write lock. Refresh is the only
/// writer; guards are never held across an await point.
#[derive(Default)]
pub(crate) struct InstanceTable {
    state: RwLock<TableState>,
}

impl InstanceTable {
    pub(crate) fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = Self::default();
        table.register(services);
        table
    }

    /// Add each service with an empty instance list
    pub(crate) fn register<I, S>(&self, services: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write();
        for service in services {
            state.services.insert(service.into(), Vec::new());
        }
    }

    /// Drop every watched service and its instances
    pub(crate) fn reset(&self) {
        *self.state.write() = TableState::default();
    }

    pub(crate) fn is_watched<S: AsRef<str>>(&self, services: &[S]) -> bool {
        let state = self.state.read();
        services
            .iter()
            .all(|s| state.services.contains_key(s.as_ref()))
    }

    pub(crate) fn watched(&self) -> Vec<String> {
        self.state.read().services.keys().cloned().collect()
    }

    /// Replace every watched list with the matching subset of `instances`
    ///
    /// The whole clear, repopulate and validate sequence runs under one write
    /// guard. A validation error is reported after the fresh data has been
    /// stored; there is no rollback.
    pub(crate) fn replace_all(&self, instances: Vec<Instance>) -> Result<(), CacheError> {
        let mut state = self.state.write();

        for list in state.services.values_mut() {
            list.clear();
        }

        for instance in instances {
            if let Some(list) = state.services.get_mut(&instance.service) {
                list.push(Arc::new(instance));
            }
        }

        state.last_refresh = Some(Utc::now());

        match state.services.iter().find(|(_, list)| list.is_empty()) {
            Some((service, _)) => Err(CacheError::Validation(service.clone())),
            None => Ok(()),
        }
    }

    /// Pick one instance of `service` uniformly at random
    ///
    /// Returns `Ok(None)` when the service is watched but currently empty.
    pub(crate) fn select(&self, service: &str) -> Result<Option<Arc<Instance>>, CacheError> {
        let state = self.state.read();
        let list = state
            .services
            .get(service)
            .ok_or_else(|| CacheError::Unregistered(service.to_string()))?;

        if list.is_empty() {
            return Ok(None);
        }

        let idx = rand::rng().random_range(0..list.len());
        Ok(Some(list[idx].clone()))
    }

    pub(crate) fn instances(&self, service: &str) -> Option<Vec<Arc<Instance>>> {
        self.state.read().services.get(service).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let state = self.state.read();
        state
            .services
            .iter()
            .map(|(service, list)| ServiceSnapshot {
                service: service.clone(),
                instance_count: list.len(),
                last_refresh: state.last_refresh,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn instances() -> Vec<Instance> {
        vec![
            Instance::new("1", "auth", "192.168.2.1", 80),
            Instance::new("2", "auth", "192.168.2.2", 80),
            Instance::new("3", "acl", "192.168.2.3", 8080),
            Instance::new("4", "lecture", "192.168.2.4", 80),
        ]
    }

    #[test]
    fn test_register_and_is_watched() {
        let table = InstanceTable::new(["auth", "acl"]);
        assert!(table.is_watched(&["auth", "acl"]));
        assert!(table.is_watched(&["acl"]));
        assert!(!table.is_watched(&["auth", "lecture"]));
        assert_eq!(table.watched(), vec!["acl".to_string(), "auth".to_string()]);
    }

    #[test]
    fn test_replace_all_discards_unwatched() {
        let table = InstanceTable::new(["auth", "acl"]);
        table.replace_all(instances()).unwrap();

        assert_eq!(table.instances("auth").unwrap().len(), 2);
        assert_eq!(table.instances("acl").unwrap().len(), 1);
        assert!(table.instances("lecture").is_none());
        assert_eq!(table.watched().len(), 2);
    }

    #[test]
    fn test_replace_all_clears_previous_instances() {
        let table = InstanceTable::new(["auth"]);
        table.replace_all(instances()).unwrap();
        table
            .replace_all(vec![Instance::new("9", "auth", "10.0.0.9", 80)])
            .unwrap();

        let current = table.instances("auth").unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, "9");
    }

    #[test]
    fn test_replace_all_reports_empty_service_without_rollback() {
        let table = InstanceTable::new(["auth", "document"]);
        let err = table.replace_all(instances()).unwrap_err();

        assert!(matches!(err, CacheError::Validation(ref s) if s == "document"));
        assert_eq!(table.instances("auth").unwrap().len(), 2);
    }

    #[test]
    fn test_select() {
        let table = InstanceTable::new(["auth", "acl"]);
        assert!(table.select("auth").unwrap().is_none());
        assert!(matches!(
            table.select("lecture"),
            Err(CacheError::Unregistered(_))
        ));

        table.replace_all(instances()).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let instance = table.select("auth").unwrap().unwrap();
            assert_eq!(instance.service, "auth");
            seen.insert(instance.id.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_snapshot() {
        let table = InstanceTable::new(["auth", "acl"]);
        assert!(table.snapshot().iter().all(|s| s.last_refresh.is_none()));

        table.replace_all(instances()).unwrap();
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].service, "acl");
        assert_eq!(snapshot[0].instance_count, 1);
        assert_eq!(snapshot[1].instance_count, 2);
        assert!(snapshot[1].last_refresh.is_some());
    }
}

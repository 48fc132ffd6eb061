//! The virtual-server store: the controller's single source of truth for
//! what the load balancer should be running.

use crate::config::VirtualServerConfig;
use std::collections::BTreeMap;
use tokio::sync::{Mutex, MutexGuard};

/// Identity of a virtual-server entry. Two entries may share a `ServiceKey`
/// and differ only by virtual-server name, so the store is keyed on the pair.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceKey {
    pub namespace: String,
    pub service_name: String,
    pub service_port: i32,
}

/// Ordering of this key is the emission order: namespace, then service, then
/// port, then name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    namespace: String,
    service_name: String,
    service_port: i32,
    vs_name: String,
}

impl EntryKey {
    fn new(key: &ServiceKey, vs_name: &str) -> Self {
        Self {
            namespace: key.namespace.clone(),
            service_name: key.service_name.clone(),
            service_port: key.service_port,
            vs_name: vs_name.to_string(),
        }
    }

    fn service_key(&self) -> ServiceKey {
        ServiceKey {
            namespace: self.namespace.clone(),
            service_name: self.service_name.clone(),
            service_port: self.service_port,
        }
    }
}

/// The indexed map itself. Only reachable through the store's exclusive
/// guard, so every compound read-modify-write is serialized.
#[derive(Debug, Default)]
pub struct VsIndex {
    entries: BTreeMap<EntryKey, VirtualServerConfig>,
}

#[derive(Debug, Default)]
pub struct VirtualServers {
    index: Mutex<VsIndex>,
}

// === impl VirtualServers ===

impl VirtualServers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the store's exclusive guard. The guard is also what config
    /// emission holds, so an emitted snapshot always corresponds to one
    /// consistent store state.
    pub async fn lock(&self) -> MutexGuard<'_, VsIndex> {
        self.index.lock().await
    }
}

// === impl VsIndex ===

impl VsIndex {
    pub fn get(&self, key: &ServiceKey, vs_name: &str) -> Option<&VirtualServerConfig> {
        self.entries.get(&EntryKey::new(key, vs_name))
    }

    /// Inserts or replaces the entry for `(key, vs_name)`.
    pub fn assign(&mut self, key: &ServiceKey, vs_name: &str, cfg: VirtualServerConfig) {
        self.entries.insert(EntryKey::new(key, vs_name), cfg);
    }

    /// Returns true if an entry existed and was removed.
    pub fn delete(&mut self, key: &ServiceKey, vs_name: &str) -> bool {
        self.entries.remove(&EntryKey::new(key, vs_name)).is_some()
    }

    /// Removes every entry belonging to a namespace, returning how many were
    /// dropped.
    pub fn purge_namespace(&mut self, namespace: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.namespace != namespace);
        before - self.entries.len()
    }

    /// Visits every entry in emission order.
    pub fn for_each<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(ServiceKey, &'a VirtualServerConfig),
    {
        for (key, cfg) in &self.entries {
            visit(key.service_key(), cfg);
        }
    }

    pub fn for_each_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(ServiceKey, &mut VirtualServerConfig),
    {
        for (key, cfg) in self.entries.iter_mut() {
            visit(key.service_key(), cfg);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

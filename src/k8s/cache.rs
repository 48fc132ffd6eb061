use super::{object_key, ResourceExt};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;

/// A cache of watched objects indexed by `"namespace/name"`.
///
/// One cache backs each stream of an informer set. The driving task applies
/// watch events; readers take clones. The synced flag turns true once the
/// initial list has been delivered and stays true, which is what callers
/// waiting on cache sync observe.
#[derive(Debug)]
pub struct ObjectCache<T> {
    objects: Arc<RwLock<HashMap<String, T>>>,
    synced_tx: Arc<watch::Sender<bool>>,
    synced_rx: watch::Receiver<bool>,
}

impl<T> Clone for ObjectCache<T> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            synced_tx: self.synced_tx.clone(),
            synced_rx: self.synced_rx.clone(),
        }
    }
}

impl<T> Default for ObjectCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

// === impl ObjectCache ===

impl<T> ObjectCache<T> {
    pub fn new() -> Self {
        let (synced_tx, synced_rx) = watch::channel(false);
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            synced_tx: Arc::new(synced_tx),
            synced_rx,
        }
    }

    pub fn has_synced(&self) -> bool {
        *self.synced_rx.borrow()
    }

    pub fn mark_synced(&self) {
        let _ = self.synced_tx.send(true);
    }

    /// Waits until the initial list has been delivered. Returns immediately
    /// if the driving task has gone away.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl<T> ObjectCache<T>
where
    T: kube::Resource + Clone,
{
    pub fn get(&self, key: &str) -> Option<T> {
        self.objects.read().get(key).cloned()
    }

    /// All cached objects in the given namespace.
    pub fn by_namespace(&self, namespace: &str) -> Vec<T> {
        self.objects
            .read()
            .values()
            .filter(|obj| obj.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect()
    }

    pub fn items(&self) -> Vec<T> {
        self.objects.read().values().cloned().collect()
    }

    pub fn apply(&self, obj: T) {
        self.objects.write().insert(object_key(&obj), obj);
    }

    pub fn delete(&self, obj: &T) {
        self.objects.write().remove(&object_key(obj));
    }

    /// Replaces the whole cache with a freshly listed set and marks it
    /// synced; this is how a watch restart is absorbed.
    pub fn replace(&self, objs: Vec<T>) {
        let mut cache = self.objects.write();
        cache.clear();
        for obj in objs {
            cache.insert(object_key(&obj), obj);
        }
        drop(cache);
        self.mark_synced();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{ObjectMeta, Service};

    fn mk_service(ns: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some(ns.into()),
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn apply_get_delete() {
        let cache = ObjectCache::new();
        cache.apply(mk_service("demo", "web"));
        assert!(cache.get("demo/web").is_some());
        assert!(cache.get("demo/db").is_none());

        cache.delete(&mk_service("demo", "web"));
        assert!(cache.get("demo/web").is_none());
    }

    #[test]
    fn by_namespace_filters() {
        let cache = ObjectCache::new();
        cache.apply(mk_service("demo", "web"));
        cache.apply(mk_service("demo", "db"));
        cache.apply(mk_service("other", "web"));
        assert_eq!(cache.by_namespace("demo").len(), 2);
        assert_eq!(cache.by_namespace("other").len(), 1);
        assert_eq!(cache.by_namespace("absent").len(), 0);
    }

    #[tokio::test]
    async fn replace_marks_synced() {
        let cache = ObjectCache::new();
        assert!(!cache.has_synced());

        cache.replace(vec![mk_service("demo", "web")]);
        assert!(cache.has_synced());
        cache.wait_synced().await;
        assert_eq!(cache.items().len(), 1);
    }
}

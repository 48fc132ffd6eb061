//! Per-namespace informer sets: cached list/watch streams whose handlers
//! feed the work queues.

use crate::k8s::{ConfigMap, Endpoints, Event, Namespace, ObjectCache, Service, Watch};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube_runtime::watcher;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::{
    fmt,
    future::Future,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::watch, time};
use tracing::debug;

/// The reconciler capability handed to informer sets. Handlers validate and
/// enqueue through this; informers hold it weakly so there is no owning
/// back-pointer from the watch tasks to the controller.
#[async_trait]
pub(crate) trait EventSink: Send + Sync {
    async fn handle_config_map(&self, cm: ConfigMap);
    async fn handle_service(&self, svc: Service);
    async fn handle_endpoints(&self, eps: Endpoints);
    async fn handle_namespace(&self, ns: Namespace);
}

/// Three cached streams (config maps, services, endpoints) bound to one
/// namespace and one stop signal.
pub struct AppInformer {
    namespace: String,
    pub(crate) cfg_maps: ObjectCache<ConfigMap>,
    pub(crate) services: ObjectCache<Service>,
    pub(crate) endpoints: ObjectCache<Endpoints>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    state: Mutex<State>,
}

enum State {
    Created(Streams),
    Running,
    Stopped,
    /// No watch streams at all; caches are populated directly. This is the
    /// unit-test seam, mirroring a controller built without an API client.
    Detached,
}

struct Streams {
    cfg_maps: Watch<ConfigMap>,
    services: Watch<Service>,
    endpoints: Watch<Endpoints>,
    sink: Weak<dyn EventSink>,
    resync: Option<Duration>,
}

// === impl AppInformer ===

impl AppInformer {
    pub(crate) fn new(
        client: kube::Client,
        namespace: &str,
        cfg_map_selector: &str,
        resync: Option<Duration>,
        sink: Weak<dyn EventSink>,
    ) -> Self {
        let (cfg_api, svc_api, ep_api): (Api<ConfigMap>, Api<Service>, Api<Endpoints>) =
            if namespace.is_empty() {
                (
                    Api::all(client.clone()),
                    Api::all(client.clone()),
                    Api::all(client),
                )
            } else {
                (
                    Api::namespaced(client.clone(), namespace),
                    Api::namespaced(client.clone(), namespace),
                    Api::namespaced(client, namespace),
                )
            };
        let cfg_params = ListParams::default().labels(cfg_map_selector);
        let streams = Streams {
            cfg_maps: watcher(cfg_api, cfg_params).into(),
            services: watcher(svc_api, ListParams::default()).into(),
            endpoints: watcher(ep_api, ListParams::default()).into(),
            sink,
            resync,
        };
        Self::with_state(namespace, State::Created(streams))
    }

    /// An informer set with no backing streams; its caches are already
    /// synced and are populated directly.
    pub(crate) fn detached(namespace: &str) -> Self {
        let inf = Self::with_state(namespace, State::Detached);
        inf.cfg_maps.mark_synced();
        inf.services.mark_synced();
        inf.endpoints.mark_synced();
        inf
    }

    fn with_state(namespace: &str, state: State) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            namespace: namespace.to_string(),
            cfg_maps: ObjectCache::new(),
            services: ObjectCache::new(),
            endpoints: ObjectCache::new(),
            stop_tx,
            stop_rx,
            state: Mutex::new(state),
        }
    }

    /// Launches the three streams. A second call is a no-op.
    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        let streams = match std::mem::replace(&mut *state, State::Stopped) {
            State::Created(streams) => streams,
            other => {
                *state = other;
                debug!(namespace = %self.namespace, "Informer set not startable");
                return;
            }
        };
        let Streams {
            cfg_maps,
            services,
            endpoints,
            sink,
            resync,
        } = streams;
        tokio::spawn(run_informer(
            cfg_maps,
            self.cfg_maps.clone(),
            sink.clone(),
            |sink: Arc<dyn EventSink>, cm| async move { sink.handle_config_map(cm).await },
            resync,
            self.stop_rx.clone(),
        ));
        tokio::spawn(run_informer(
            services,
            self.services.clone(),
            sink.clone(),
            |sink: Arc<dyn EventSink>, svc| async move { sink.handle_service(svc).await },
            resync,
            self.stop_rx.clone(),
        ));
        tokio::spawn(run_informer(
            endpoints,
            self.endpoints.clone(),
            sink,
            |sink: Arc<dyn EventSink>, eps| async move { sink.handle_endpoints(eps).await },
            resync,
            self.stop_rx.clone(),
        ));
        *state = State::Running;
    }

    /// Blocks until all three initial lists have been delivered, or until the
    /// set is stopped.
    pub(crate) async fn wait_for_cache_sync(&self) {
        let mut stop = self.stop_rx.clone();
        if *stop.borrow() {
            return;
        }
        tokio::select! {
            _ = async {
                self.cfg_maps.wait_synced().await;
                self.services.wait_synced().await;
                self.endpoints.wait_synced().await;
            } => {}
            _ = stop.changed() => {}
        }
    }

    pub fn has_synced(&self) -> bool {
        self.cfg_maps.has_synced() && self.services.has_synced() && self.endpoints.has_synced()
    }

    /// Closes the shared stop signal; the watch tasks wind down on their own.
    /// Idempotent, and terminal: a stopped set cannot be restarted.
    pub(crate) fn stop(&self) {
        *self.state.lock() = State::Stopped;
        let _ = self.stop_tx.send(true);
    }
}

/// A single watch over namespaces filtered by label, feeding the namespace
/// queue.
pub struct NamespaceInformer {
    pub(crate) namespaces: ObjectCache<Namespace>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    state: Mutex<NsState>,
}

enum NsState {
    Created {
        stream: Watch<Namespace>,
        sink: Weak<dyn EventSink>,
        resync: Option<Duration>,
    },
    Running,
    Stopped,
    Detached,
}

// === impl NamespaceInformer ===

impl NamespaceInformer {
    pub(crate) fn new(
        client: kube::Client,
        label_selector: &str,
        resync: Option<Duration>,
        sink: Weak<dyn EventSink>,
    ) -> Self {
        let api: Api<Namespace> = Api::all(client);
        let params = ListParams::default().labels(label_selector);
        Self::with_state(NsState::Created {
            stream: watcher(api, params).into(),
            sink,
            resync,
        })
    }

    pub(crate) fn detached() -> Self {
        let inf = Self::with_state(NsState::Detached);
        inf.namespaces.mark_synced();
        inf
    }

    fn with_state(state: NsState) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            namespaces: ObjectCache::new(),
            stop_tx,
            stop_rx,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, NsState::Stopped) {
            NsState::Created {
                stream,
                sink,
                resync,
            } => {
                tokio::spawn(run_informer(
                    stream,
                    self.namespaces.clone(),
                    sink,
                    |sink: Arc<dyn EventSink>, ns| async move { sink.handle_namespace(ns).await },
                    resync,
                    self.stop_rx.clone(),
                ));
                *state = NsState::Running;
            }
            other => {
                *state = other;
                debug!("Namespace informer not startable");
            }
        }
    }

    pub(crate) async fn wait_for_cache_sync(&self) {
        let mut stop = self.stop_rx.clone();
        if *stop.borrow() {
            return;
        }
        tokio::select! {
            _ = self.namespaces.wait_synced() => {}
            _ = stop.changed() => {}
        }
    }

    pub(crate) fn stop(&self) {
        *self.state.lock() = NsState::Stopped;
        let _ = self.stop_tx.send(true);
    }
}

/// Drives one cached stream: apply events to the cache, then hand the object
/// to the sink. Exits when the stop signal fires or the sink is gone.
async fn run_informer<T, F, Fut>(
    mut watch: Watch<T>,
    cache: ObjectCache<T>,
    sink: Weak<dyn EventSink>,
    dispatch: F,
    resync: Option<Duration>,
    mut stop: watch::Receiver<bool>,
) where
    T: kube::Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    T::DynamicType: Clone + Eq + Hash + Default,
    F: Fn(Arc<dyn EventSink>, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut resync_tick =
        resync.map(|period| time::interval_at(time::Instant::now() + period, period));
    loop {
        tokio::select! {
            ev = watch.recv(&mut stop) => match ev {
                None => return,
                Some(Event::Applied(obj)) => {
                    cache.apply(obj.clone());
                    if !deliver(&sink, &dispatch, obj).await {
                        return;
                    }
                }
                Some(Event::Deleted(obj)) => {
                    cache.delete(&obj);
                    if !deliver(&sink, &dispatch, obj).await {
                        return;
                    }
                }
                Some(Event::Restarted(objs)) => {
                    cache.replace(objs.clone());
                    for obj in objs {
                        if !deliver(&sink, &dispatch, obj).await {
                            return;
                        }
                    }
                }
            },
            _ = next_resync(&mut resync_tick) => {
                for obj in cache.items() {
                    if !deliver(&sink, &dispatch, obj).await {
                        return;
                    }
                }
            }
        }
    }
}

async fn deliver<T, F, Fut>(sink: &Weak<dyn EventSink>, dispatch: &F, obj: T) -> bool
where
    F: Fn(Arc<dyn EventSink>, T) -> Fut,
    Fut: Future<Output = ()>,
{
    match sink.upgrade() {
        Some(sink) => {
            dispatch(sink, obj).await;
            true
        }
        None => false,
    }
}

async fn next_resync(interval: &mut Option<time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

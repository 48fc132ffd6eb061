//! The controller core: namespace registry, work queues, sync loops, node
//! cache, and config emission.

use crate::{
    annotations::AnnotationWriter,
    config::{
        format_virtual_server_name, parse_virtual_server_config, ParseFailure,
        VirtualServerConfig,
    },
    informers::{AppInformer, EventSink, NamespaceInformer},
    k8s::{ConfigMap, Endpoints, Namespace, Node, ResourceExt, Service},
    queue::RateLimitingQueue,
    vservers::{ServiceKey, VirtualServers, VsIndex},
    writer::{recv_or_pending, ConfigWriter, SectionHandle},
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    time,
};
use tracing::{debug, info, instrument, warn};

/// Label selector that identifies virtual-server config maps.
pub const DEFAULT_CONFIG_MAP_LABEL: &str = "f5type in (virtual-server)";

/// Annotation reporting the bind address chosen for a virtual server.
pub const VS_BIND_ADDR_ANNOTATION: &str = "status.virtual-server.f5.com/ip";

/// Work-queue item for the virtual-server queue.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VsQueueKey {
    pub namespace: String,
    pub service_name: String,
}

/// Everything a `Manager` needs from the outer process.
pub struct Params {
    /// Absent in unit tests; informer sets are then detached and their
    /// caches populated directly.
    pub client: Option<kube::Client>,
    pub config_writer: Arc<dyn ConfigWriter>,
    pub annotation_writer: Option<Arc<dyn AnnotationWriter>>,
    pub use_node_internal: bool,
    pub is_node_port: bool,
}

/// Tracked informer sets. The empty-string key means "all namespaces" and is
/// exclusive with specific keys.
struct Informers {
    app: HashMap<String, Arc<AppInformer>>,
    ns: Option<Arc<NamespaceInformer>>,
    started: bool,
}

/// The controller instance. One per process; owns the virtual-server store,
/// the node cache, both work queues and the informer registry.
///
/// Lock order, outermost first: `informers`, then the store guard, then the
/// node cache. No lock is held across a queue `get` or a watch; the store
/// guard is held across config emission, which the emitter bounds to one
/// second.
pub struct Manager {
    vservers: VirtualServers,
    /// Node addresses from the previous poll, sorted and deduplicated.
    old_nodes: Mutex<Vec<String>>,
    client: Option<kube::Client>,
    config_writer: Arc<dyn ConfigWriter>,
    annotation_writer: Option<Arc<dyn AnnotationWriter>>,
    use_node_internal: bool,
    is_node_port: bool,
    vs_queue: RateLimitingQueue<VsQueueKey>,
    ns_queue: RateLimitingQueue<String>,
    informers: Mutex<Informers>,
}

// === impl Manager ===

impl Manager {
    pub fn new(params: Params) -> Self {
        Self {
            vservers: VirtualServers::new(),
            old_nodes: Mutex::new(Vec::new()),
            client: params.client,
            config_writer: params.config_writer,
            annotation_writer: params.annotation_writer,
            use_node_internal: params.use_node_internal,
            is_node_port: params.is_node_port,
            vs_queue: RateLimitingQueue::named("virtual-server-controller"),
            ns_queue: RateLimitingQueue::named("namespace-controller"),
            informers: Mutex::new(Informers {
                app: HashMap::new(),
                ns: None,
                started: false,
            }),
        }
    }

    pub fn is_node_port(&self) -> bool {
        self.is_node_port
    }

    pub fn use_node_internal(&self) -> bool {
        self.use_node_internal
    }

    /// Registers a namespace to watch. Adding a namespace that is already
    /// watched is a no-op; mixing "" (all namespaces) with specific ones is
    /// an error either way around.
    pub async fn add_namespace(
        self: &Arc<Self>,
        namespace: &str,
        cfg_map_selector: &str,
        resync: Option<Duration>,
    ) -> Result<()> {
        let mut informers = self.informers.lock().await;
        self.add_namespace_locked(&mut informers, namespace, cfg_map_selector, resync)?;
        Ok(())
    }

    fn add_namespace_locked(
        self: &Arc<Self>,
        informers: &mut Informers,
        namespace: &str,
        cfg_map_selector: &str,
        resync: Option<Duration>,
    ) -> Result<Arc<AppInformer>> {
        if let Some(existing) = informers.app.get(namespace) {
            return Ok(existing.clone());
        }
        if informers.app.contains_key("") {
            bail!("cannot add additional namespaces when already watching all");
        }
        if !informers.app.is_empty() && namespace.is_empty() {
            bail!("cannot watch all namespaces when already watching specific ones");
        }
        let informer = self.new_app_informer(namespace, cfg_map_selector, resync);
        if informers.started {
            informer.start();
        }
        informers.app.insert(namespace.to_string(), informer.clone());
        Ok(informer)
    }

    fn new_app_informer(
        self: &Arc<Self>,
        namespace: &str,
        cfg_map_selector: &str,
        resync: Option<Duration>,
    ) -> Arc<AppInformer> {
        match &self.client {
            Some(client) => {
                let sink: Weak<dyn EventSink> = Arc::downgrade(&(self.clone() as Arc<dyn EventSink>));
                Arc::new(AppInformer::new(
                    client.clone(),
                    namespace,
                    cfg_map_selector,
                    resync,
                    sink,
                ))
            }
            None => Arc::new(AppInformer::detached(namespace)),
        }
    }

    /// Stops watching a namespace, purging every store entry it owns and
    /// emitting if anything was purged.
    pub async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        let informer = {
            let mut informers = self.informers.lock().await;
            match informers.app.remove(namespace) {
                Some(informer) => informer,
                None => bail!("no informers exist for namespace {}", namespace),
            }
        };
        informer.stop();

        let mut vs = self.vservers.lock().await;
        if vs.purge_namespace(namespace) > 0 {
            self.output_config_locked(&vs).await;
        }
        Ok(())
    }

    /// Installs the dynamic namespace watch. Only valid while no namespaces
    /// are registered; thereafter namespaces come and go with their labels.
    /// Must be installed before the controller runs.
    pub async fn add_namespace_informer(
        self: &Arc<Self>,
        label_selector: &str,
        resync: Option<Duration>,
    ) -> Result<()> {
        let mut informers = self.informers.lock().await;
        if informers.ns.is_some() {
            bail!("already have a namespace informer added");
        }
        if !informers.app.is_empty() {
            bail!("cannot set a namespace informer when informers have been installed for one or more namespaces");
        }
        let informer = match &self.client {
            Some(client) => {
                let sink: Weak<dyn EventSink> = Arc::downgrade(&(self.clone() as Arc<dyn EventSink>));
                NamespaceInformer::new(client.clone(), label_selector, resync, sink)
            }
            None => NamespaceInformer::detached(),
        };
        informers.ns = Some(Arc::new(informer));
        Ok(())
    }

    pub async fn watched_namespaces(&self) -> Vec<String> {
        let informers = self.informers.lock().await;
        let mut namespaces: Vec<String> = informers.app.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Looks up the informer set responsible for a namespace; under a
    /// catch-all registration every namespace resolves to the "" set.
    pub(crate) async fn resolve_informer(&self, namespace: &str) -> Option<Arc<AppInformer>> {
        let informers = self.informers.lock().await;
        resolve_locked(&informers, namespace)
    }

    /// Runs the controller until the stop signal fires: starts informers,
    /// waits for their caches, drains both queues with one worker each, then
    /// winds everything down.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut workers = Vec::new();

        let ns_informer = { self.informers.lock().await.ns.clone() };
        if let Some(ns_informer) = ns_informer {
            ns_informer.start();
            ns_informer.wait_for_cache_sync().await;
            workers.push(tokio::spawn(self.clone().namespace_worker()));
        }

        self.start_and_sync_app_informers().await;
        workers.push(tokio::spawn(self.clone().virtual_server_worker()));

        if !*stop.borrow() {
            let _ = stop.changed().await;
        }
        self.shutdown().await;
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn start_and_sync_app_informers(&self) {
        let mut informers = self.informers.lock().await;
        informers.started = true;
        for informer in informers.app.values() {
            informer.start();
        }
        for informer in informers.app.values() {
            informer.wait_for_cache_sync().await;
        }
    }

    /// Idempotent: stopped informers and shut-down queues absorb repeats.
    async fn shutdown(&self) {
        {
            let informers = self.informers.lock().await;
            if let Some(ns_informer) = &informers.ns {
                ns_informer.stop();
            }
            for informer in informers.app.values() {
                informer.stop();
            }
        }
        self.ns_queue.shut_down();
        self.vs_queue.shut_down();
    }

    async fn namespace_worker(self: Arc<Self>) {
        while let Some(name) = self.ns_queue.get().await {
            match self.sync_namespace(&name).await {
                Ok(()) => self.ns_queue.forget(&name),
                Err(error) => {
                    warn!(%error, namespace = %name, "Namespace sync failed");
                    self.ns_queue.add_rate_limited(name.clone());
                }
            }
            self.ns_queue.done(&name);
        }
        debug!("Namespace worker exiting");
    }

    async fn virtual_server_worker(self: Arc<Self>) {
        while let Some(key) = self.vs_queue.get().await {
            match self.sync_virtual_server(&key).await {
                Ok(()) => self.vs_queue.forget(&key),
                Err(error) => {
                    warn!(%error, ?key, "Virtual server sync failed");
                    self.vs_queue.add_rate_limited(key.clone());
                }
            }
            self.vs_queue.done(&key);
        }
        debug!("Virtual server worker exiting");
    }

    /// Brings the registry in line with one namespace's presence in the
    /// namespace informer's cache.
    pub(crate) async fn sync_namespace(self: &Arc<Self>, name: &str) -> Result<()> {
        let mut informers = self.informers.lock().await;
        let exists = match &informers.ns {
            Some(ns_informer) => ns_informer.namespaces.get(name).is_some(),
            None => false,
        };
        let found = resolve_locked(&informers, name).is_some();

        match (exists, found) {
            (true, true) | (false, false) => Ok(()),
            (true, false) => {
                // Newly labelled namespace: watch it.
                let informer = self.add_namespace_locked(
                    &mut informers,
                    name,
                    DEFAULT_CONFIG_MAP_LABEL,
                    None,
                )?;
                informer.start();
                informer.wait_for_cache_sync().await;
                Ok(())
            }
            (false, true) => {
                // Unlabelled or deleted: stop watching and drop its virtual
                // servers.
                if let Some(informer) = informers.app.remove(name) {
                    informer.stop();
                }
                drop(informers);
                let mut vs = self.vservers.lock().await;
                if vs.purge_namespace(name) > 0 {
                    self.output_config_locked(&vs).await;
                }
                Ok(())
            }
        }
    }

    /// Reconciles every virtual-server definition that references one
    /// service, deriving pool members and activation from the current
    /// service, endpoints and node state.
    #[instrument(level = "debug", skip(self), fields(namespace = %key.namespace, service = %key.service_name))]
    pub(crate) async fn sync_virtual_server(&self, key: &VsQueueKey) -> Result<()> {
        let app_informer = match self.resolve_informer(&key.namespace).await {
            Some(informer) => informer,
            None => {
                // The namespace is checked before anything is enqueued, so
                // this only fires for events that raced a removal.
                warn!("Received an update for an item from an un-watched namespace");
                return Ok(());
            }
        };

        let svc_cache_key = format!("{}/{}", key.namespace, key.service_name);
        let svc = app_informer.services.get(&svc_cache_key);

        let mut svc_port_map = HashSet::new();
        if let Some(ref svc) = svc {
            if let Some(ref spec) = svc.spec {
                for port in spec.ports.iter().flatten() {
                    svc_port_map.insert(port.port);
                }
            }
        }

        // Snapshot of the store entries matching this key, indexed by port.
        // Entries still here after the config-map pass reference ports no
        // definition claims and get deleted.
        let mut vs_map: HashMap<i32, VirtualServerConfig> = HashMap::new();
        {
            let vs = self.vservers.lock().await;
            vs.for_each(|entry_key, cfg| {
                if entry_key.namespace == key.namespace
                    && entry_key.service_name == key.service_name
                {
                    vs_map.insert(cfg.virtual_server.backend.service_port, cfg.clone());
                }
            });
        }

        let mut vs_found = 0;
        let mut vs_updated = 0;
        let mut vs_deleted = 0;

        for cm in app_informer.cfg_maps.by_namespace(&key.namespace) {
            let mut cfg = match parse_virtual_server_config(&cm) {
                Ok(cfg) => cfg,
                Err(failure) => {
                    // The watch handler owns purging entries for invalid
                    // definitions; during a sync the object is just skipped.
                    debug!(config_map = %cm.name(), error = %failure, "Skipping unparseable config map");
                    continue;
                }
            };
            if cfg.virtual_server.backend.service_name != key.service_name {
                continue;
            }

            vs_map.remove(&cfg.virtual_server.backend.service_port);
            let store_key = ServiceKey {
                namespace: key.namespace.clone(),
                service_name: key.service_name.clone(),
                service_port: cfg.virtual_server.backend.service_port,
            };
            let vs_name = format_virtual_server_name(&cm);

            if !svc_port_map.contains(&store_key.service_port) {
                debug!(port = store_key.service_port, "Service port not present");
                if self
                    .deactivate_virtual_server(&store_key, &vs_name, &mut cfg)
                    .await
                {
                    vs_updated += 1;
                }
            }

            cfg.virtual_server.frontend.virtual_server_name = vs_name.clone();

            let svc = match svc.as_ref() {
                Some(svc) => svc,
                None => {
                    // The service is gone; deactivate in place.
                    if self
                        .deactivate_virtual_server(&store_key, &vs_name, &mut cfg)
                        .await
                    {
                        vs_updated += 1;
                    }
                    continue;
                }
            };

            vs_found += 1;
            if self.is_node_port {
                self.update_pool_members_for_node_port(svc, &store_key, &mut cfg)
                    .await;
            } else {
                update_pool_members_for_cluster(&app_informer, svc, &store_key, &mut cfg);
            }

            let bind_addr = cfg
                .virtual_server
                .frontend
                .virtual_address
                .as_ref()
                .map(|va| va.bind_addr.clone())
                .unwrap_or_default();
            if cfg.virtual_server.frontend.iapp_template.is_empty() && !bind_addr.is_empty() {
                self.set_bind_addr_annotation(&cm, &bind_addr).await;
            }

            if self.save_virtual_server(&store_key, &vs_name, cfg).await {
                vs_updated += 1;
            }
        }

        if !vs_map.is_empty() {
            let mut vs = self.vservers.lock().await;
            for (port, cfg) in &vs_map {
                let doomed = ServiceKey {
                    namespace: key.namespace.clone(),
                    service_name: key.service_name.clone(),
                    service_port: *port,
                };
                if vs.delete(&doomed, &cfg.virtual_server.frontend.virtual_server_name) {
                    vs_deleted += 1;
                }
            }
        }

        debug!(
            updated = vs_updated,
            found = vs_found,
            deleted = vs_deleted,
            "Finished syncing virtual servers"
        );
        if vs_updated > 0 || vs_deleted > 0 {
            self.output_config().await;
        }
        Ok(())
    }

    /// Marks an entry inactive with an empty pool. Reports whether the store
    /// changed; an entry that was already in the deactivated form is left
    /// alone.
    async fn deactivate_virtual_server(
        &self,
        key: &ServiceKey,
        vs_name: &str,
        cfg: &mut VirtualServerConfig,
    ) -> bool {
        cfg.meta_data.active = false;
        cfg.virtual_server.backend.pool_member_addrs = Vec::new();

        let mut vs = self.vservers.lock().await;
        let update = match vs.get(key, vs_name) {
            Some(existing) => existing != &*cfg,
            None => true,
        };
        if update {
            debug!(service = %key.service_name, port = key.service_port, "Deactivating virtual server");
            vs.assign(key, vs_name, cfg.clone());
        }
        update
    }

    /// Saves the entry only if it differs from what is stored.
    async fn save_virtual_server(
        &self,
        key: &ServiceKey,
        vs_name: &str,
        cfg: VirtualServerConfig,
    ) -> bool {
        let mut vs = self.vservers.lock().await;
        if let Some(existing) = vs.get(key, vs_name) {
            if existing == &cfg {
                return false;
            }
            warn!(service = %key.service_name, port = key.service_port, "Overwriting existing entry for backend");
        }
        vs.assign(key, vs_name, cfg);
        true
    }

    /// NodePort pool derivation: one `node:nodePort` member per cached node
    /// address. A service of any other type is left untouched.
    async fn update_pool_members_for_node_port(
        &self,
        svc: &Service,
        key: &ServiceKey,
        cfg: &mut VirtualServerConfig,
    ) {
        let spec = match &svc.spec {
            Some(spec) => spec,
            None => return,
        };
        if spec.type_.as_deref() == Some("NodePort") {
            for port in spec.ports.iter().flatten() {
                if port.port == key.service_port {
                    let node_port = port.node_port.unwrap_or(0);
                    debug!(service = %key.service_name, node_port, "Service backend matched; using node port");
                    cfg.meta_data.active = true;
                    cfg.meta_data.node_port = node_port;
                    cfg.virtual_server.backend.pool_member_addrs =
                        self.pool_members_for_node_port(node_port).await;
                }
            }
        } else {
            debug!(service = %key.service_name, "Requested service backend not of NodePort type");
        }
    }

    async fn pool_members_for_node_port(&self, node_port: i32) -> Vec<String> {
        let nodes = self.old_nodes.lock().await;
        nodes
            .iter()
            .map(|node| format!("{}:{}", node, node_port))
            .collect()
    }

    /// Reports the chosen bind address on the config map, if it changed.
    /// Annotation write errors are logged and swallowed; the next sync
    /// retries naturally.
    async fn set_bind_addr_annotation(&self, cm: &ConfigMap, bind_addr: &str) {
        if cm.annotations().get(VS_BIND_ADDR_ANNOTATION).map(String::as_str) == Some(bind_addr) {
            return;
        }
        let namespace = cm.namespace().unwrap_or_default();
        let name = cm.name();
        match &self.annotation_writer {
            Some(writer) => {
                match writer
                    .set_annotation(&namespace, &name, VS_BIND_ADDR_ANNOTATION, bind_addr)
                    .await
                {
                    Ok(()) => {
                        debug!(config_map = %name, %bind_addr, "Updated bind address annotation")
                    }
                    Err(error) => warn!(%error, "Error when creating status IP annotation"),
                }
            }
            None => debug!(config_map = %name, "No annotation writer configured"),
        }
    }

    /// The handler path for a config map that stopped parsing: purge the
    /// entry it used to define, strip its status annotation, and emit.
    async fn handle_parse_failure(&self, cm: &ConfigMap, failure: ParseFailure) {
        warn!(config_map = %cm.name(), error = %failure, "Could not get config for config map");
        let partial = match failure.partial {
            Some(partial) => partial,
            None => return,
        };
        let key = ServiceKey {
            namespace: cm.namespace().unwrap_or_default(),
            service_name: partial.virtual_server.backend.service_name.clone(),
            service_port: partial.virtual_server.backend.service_port,
        };
        let vs_name = format_virtual_server_name(cm);

        let deleted = {
            let mut vs = self.vservers.lock().await;
            vs.delete(&key, &vs_name)
        };
        if !deleted {
            return;
        }

        if let Some(writer) = &self.annotation_writer {
            if let Err(error) = writer
                .remove_annotation(&key.namespace, &cm.name(), VS_BIND_ADDR_ANNOTATION)
                .await
            {
                warn!(%error, "Error removing status IP annotation");
            }
        }
        warn!(config_map = %cm.name(), "Deleted virtual server associated with config map");
        self.output_config().await;
    }

    /// Absorbs a node poll. On any change to the (sorted, deduplicated)
    /// address set, rewrites every NodePort pool and emits once.
    pub async fn process_node_update(&self, nodes: Vec<Node>) {
        let mut new_nodes = self.node_addresses(&nodes);
        new_nodes.sort();
        new_nodes.dedup();

        // Lock order: store, then node cache.
        let mut vs = self.vservers.lock().await;
        let mut old_nodes = self.old_nodes.lock().await;
        if *old_nodes == new_nodes {
            return;
        }
        info!("Change in node state detected");
        if self.is_node_port {
            vs.for_each_mut(|_key, cfg| {
                let node_port = cfg.meta_data.node_port;
                cfg.virtual_server.backend.pool_member_addrs = new_nodes
                    .iter()
                    .map(|node| format!("{}:{}", node, node_port))
                    .collect();
            });
        }
        self.output_config_locked(&vs).await;
        *old_nodes = new_nodes;
    }

    fn node_addresses(&self, nodes: &[Node]) -> Vec<String> {
        let addr_type = if self.use_node_internal {
            "InternalIP"
        } else {
            "ExternalIP"
        };
        let mut addrs = Vec::new();
        for node in nodes {
            let unschedulable = node
                .spec
                .as_ref()
                .and_then(|spec| spec.unschedulable)
                .unwrap_or(false);
            if unschedulable {
                continue;
            }
            if let Some(ref status) = node.status {
                for addr in status.addresses.iter().flatten() {
                    if addr.type_ == addr_type {
                        addrs.push(addr.address.clone());
                    }
                }
            }
        }
        addrs
    }

    /// Emits the active virtual-server set.
    pub async fn output_config(&self) {
        let vs = self.vservers.lock().await;
        self.output_config_locked(&vs).await;
    }

    /// Emission body for callers already holding the store guard, which is
    /// what linearizes the snapshot against store mutation. Waits at most one
    /// second for the writer to respond.
    async fn output_config_locked(&self, vs: &VsIndex) {
        // Collected into a vec so the empty set serializes as `[]`, never as
        // a null token.
        let mut services: Vec<&VirtualServerConfig> = Vec::new();
        vs.for_each(|_key, cfg| {
            if cfg.meta_data.active {
                services.push(cfg);
            }
        });
        let count = services.len();

        let value = match serde_json::to_value(&services) {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, "Failed to serialize virtual server configs");
                return;
            }
        };

        match self.config_writer.send_section("services", value) {
            Err(error) => warn!(%error, "Failed to write load-balancer config"),
            Ok(SectionHandle { done, error }) => {
                tokio::select! {
                    () = recv_or_pending(done) => info!(count, "Wrote virtual server configs"),
                    error = recv_or_pending(error) => {
                        warn!(%error, "Failed to write load-balancer config")
                    }
                    _ = time::sleep(Duration::from_secs(1)) => {
                        warn!("Did not receive config write response in 1s")
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for Manager {
    async fn handle_config_map(&self, cm: ConfigMap) {
        let namespace = cm.namespace().unwrap_or_default();
        if self.resolve_informer(&namespace).await.is_none() {
            return;
        }
        match parse_virtual_server_config(&cm) {
            Ok(cfg) => self.vs_queue.add(VsQueueKey {
                namespace,
                service_name: cfg.virtual_server.backend.service_name,
            }),
            Err(failure) => self.handle_parse_failure(&cm, failure).await,
        }
    }

    async fn handle_service(&self, svc: Service) {
        let namespace = svc.namespace().unwrap_or_default();
        if self.resolve_informer(&namespace).await.is_none() {
            return;
        }
        self.vs_queue.add(VsQueueKey {
            namespace,
            service_name: svc.name(),
        });
    }

    async fn handle_endpoints(&self, eps: Endpoints) {
        let namespace = eps.namespace().unwrap_or_default();
        if self.resolve_informer(&namespace).await.is_none() {
            return;
        }
        // Endpoints share their service's name; that convention is what lets
        // one queue key fan out to both resources. A cluster that breaks it
        // stalls reconciliation for the service.
        self.vs_queue.add(VsQueueKey {
            namespace,
            service_name: eps.name(),
        });
    }

    async fn handle_namespace(&self, ns: Namespace) {
        self.ns_queue.add(ns.name());
    }
}

fn resolve_locked(informers: &Informers, namespace: &str) -> Option<Arc<AppInformer>> {
    if informers.app.contains_key("") {
        informers.app.get("").cloned()
    } else {
        informers.app.get(namespace).cloned()
    }
}

/// Cluster pool derivation: the endpoint subset ports whose name matches the
/// service port's name supply `address:port` members, sorted. A missing
/// endpoints object leaves the entry untouched.
fn update_pool_members_for_cluster(
    app_informer: &AppInformer,
    svc: &Service,
    key: &ServiceKey,
    cfg: &mut VirtualServerConfig,
) {
    let eps_key = format!("{}/{}", key.namespace, key.service_name);
    let eps = match app_informer.endpoints.get(&eps_key) {
        Some(eps) => eps,
        None => {
            debug!(endpoints = %eps_key, "Endpoints for service not found");
            return;
        }
    };
    let spec = match &svc.spec {
        Some(spec) => spec,
        None => return,
    };
    for port in spec.ports.iter().flatten() {
        if port.port == key.service_port {
            let ip_ports = endpoints_for_service(port.name.as_deref().unwrap_or(""), &eps);
            debug!(service = %key.service_name, members = ip_ports.len(), "Found endpoints for backend");
            cfg.meta_data.active = true;
            cfg.virtual_server.backend.pool_member_addrs = ip_ports;
        }
    }
}

fn endpoints_for_service(port_name: &str, eps: &Endpoints) -> Vec<String> {
    let mut ip_ports = Vec::new();
    for subset in eps.subsets.iter().flatten() {
        for port in subset.ports.iter().flatten() {
            if port.name.as_deref().unwrap_or("") == port_name {
                for addr in subset.addresses.iter().flatten() {
                    ip_ports.push(format!("{}:{}", addr.ip, port.port));
                }
            }
        }
    }
    ip_ports.sort();
    ip_ports
}

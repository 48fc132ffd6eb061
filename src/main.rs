use anyhow::{bail, Result};
use bigip_ctlr::{
    annotations::ApiAnnotationWriter,
    k8s::Node,
    manager::{Manager, Params},
    writer::JsonFileWriter,
};
use kube::api::{Api, ListParams};
use std::{path::PathBuf, sync::Arc, time::Duration};
use structopt::StructOpt;
use tokio::{sync::watch, time};
use tracing::{info, warn};

#[derive(Debug, StructOpt)]
#[structopt(name = "bigip-ctlr", about = "Kubernetes virtual-server controller for BIG-IP")]
struct Args {
    /// Namespace to watch; repeatable. Watches all namespaces when absent.
    #[structopt(long)]
    namespace: Vec<String>,

    /// Watch namespaces matching this label selector instead of a fixed
    /// list.
    #[structopt(long)]
    namespace_label: Option<String>,

    /// Label selector for virtual-server config maps.
    #[structopt(long, default_value = "f5type in (virtual-server)")]
    config_map_label: String,

    /// Pool members are node addresses (nodeport) or pod addresses from
    /// endpoints (cluster).
    #[structopt(long, default_value = "nodeport")]
    pool_member_type: String,

    /// Use node InternalIP addresses rather than ExternalIP.
    #[structopt(long)]
    use_node_internal: bool,

    /// Seconds between node polls in nodeport mode.
    #[structopt(long, default_value = "30")]
    node_poll_interval: u64,

    /// Informer resync period in seconds; 0 disables resync.
    #[structopt(long, default_value = "30")]
    resync_interval: u64,

    /// Where the merged config document is written for the config driver.
    #[structopt(long, default_value = "/tmp/bigip-ctlr.config.json", parse(from_os_str))]
    output_config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::from_args();

    let is_node_port = match args.pool_member_type.as_str() {
        "nodeport" => true,
        "cluster" => false,
        other => bail!("unknown pool member type {}", other),
    };
    let resync = if args.resync_interval == 0 {
        None
    } else {
        Some(Duration::from_secs(args.resync_interval))
    };

    let client = kube::Client::try_default().await?;
    let manager = Arc::new(Manager::new(Params {
        client: Some(client.clone()),
        config_writer: Arc::new(JsonFileWriter::new(args.output_config)),
        annotation_writer: Some(Arc::new(ApiAnnotationWriter::new(client.clone()))),
        use_node_internal: args.use_node_internal,
        is_node_port,
    }));

    if let Some(ref selector) = args.namespace_label {
        manager.add_namespace_informer(selector, resync).await?;
        info!(%selector, "Watching namespaces by label");
    } else if args.namespace.is_empty() {
        manager.add_namespace("", &args.config_map_label, resync).await?;
        info!("Watching all namespaces");
    } else {
        for namespace in &args.namespace {
            manager
                .add_namespace(namespace, &args.config_map_label, resync)
                .await?;
        }
        info!(namespaces = ?args.namespace, "Watching namespaces");
    }

    let (stop_tx, stop_rx) = watch::channel(false);

    let mut poller = None;
    if is_node_port {
        let manager = manager.clone();
        let mut stop = stop_rx.clone();
        let interval = Duration::from_secs(args.node_poll_interval);
        poller = Some(tokio::spawn(async move {
            let nodes: Api<Node> = Api::all(client);
            loop {
                match nodes.list(&ListParams::default()).await {
                    Ok(list) => manager.process_node_update(list.items).await,
                    Err(error) => warn!(%error, "Unable to get list of nodes"),
                }
                tokio::select! {
                    _ = time::sleep(interval) => {}
                    _ = stop.changed() => return,
                }
            }
        }));
    }

    let run = tokio::spawn(manager.run(stop_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = stop_tx.send(true);
    let _ = run.await;
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    Ok(())
}

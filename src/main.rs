//! Dynamic networks controller entry point.

use std::sync::Arc;

use kube::runtime::watcher;
use log::{error, info};
use tokio::signal;

use dynamic_networks::config::{Config, CriType};
use dynamic_networks::controller::ADVERTISED_NAME;
use dynamic_networks::delegate::MultusClient;
use dynamic_networks::events::ClusterEvents;
use dynamic_networks::runtime::{ContainerRuntime, DockerRuntime};
use dynamic_networks::store::{ClusterDefinitionStore, ClusterPodStore};
use dynamic_networks::Controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting dynamic networks controller with config: {:?}", cfg);

    // Container Runtime
    let runtime: Arc<dyn ContainerRuntime> = match cfg.cri_type {
        CriType::Docker => Arc::new(DockerRuntime::connect(&cfg.cri_socket_path)?),
    };

    // Delegate transport
    let delegate = Arc::new(MultusClient::new(&cfg.multus_socket_path));

    // API server stores and events
    let client = kube::Client::try_default().await?;
    let pods = Arc::new(ClusterPodStore::new(client.clone()));
    let definitions = Arc::new(ClusterDefinitionStore::new(client.clone()));
    let events = Arc::new(ClusterEvents::new(
        client,
        ADVERTISED_NAME,
        cfg.node_name.clone(),
    ));

    let mut watch_config = watcher::Config::default();
    if let Some(selector) = cfg.pod_field_selector() {
        watch_config = watch_config.fields(&selector);
    }
    let pod_watch = tokio::spawn({
        let pods = pods.clone();
        async move { pods.watch(watch_config).await }
    });

    let controller = Arc::new(
        Controller::new(pods, definitions, runtime, delegate, events)
            .with_conflict_retries(cfg.conflict_retries),
    );

    // Graceful Shutdown
    controller
        .run(cfg.workers, async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
        })
        .await;

    pod_watch.abort();
    info!("Shutdown complete.");
    Ok(())
}

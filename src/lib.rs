use std::sync::Arc;

use error::ResultOkLogExt;
use publisher::{JsonLinesPublisher, Publisher};
use report::{Node, Report};
use reporter::{HostNetwork, ProcHostNetwork, Reporter};

/// CRI Probe: a runtime-introspection agent for CRI container runtimes.
///
/// This library polls a container runtime over the CRI gRPC API, keeps an
/// in-memory registry of its containers and images, and projects that state
/// into a topology report for a monitoring pipeline.
pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod grpc;
pub mod image;
pub mod publisher;
pub mod registry;
pub mod report;
pub mod reporter;
pub mod runtime;

pub mod cri_api {
    pub mod v1 {
        tonic::include_proto!("runtime.v1");
    }
}

/// Pending watcher updates before new ones are dropped.
const SHORTCUT_QUEUE_CAPACITY: usize = 64;

/// Runs the probe until ctrl-c.
///
/// Connects the registry to the configured runtime, serves the HTTP API,
/// publishes a full report every publish interval and a shortcut report for
/// every container update in between.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid `CRI_PROBE_*` environment variables.
/// - An unreachable runtime socket.
/// - Failure to listen for ctrl-c.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    log::debug!("Configuration: {config:?}");

    let registry = registry::Registry::new(
        config.registry_options(),
        &runtime::cri::CriClientFactory,
        registry::default_container_factory(),
    )
    .await?;
    log::info!("Connected to runtime at {}", config.endpoint);

    let host: Arc<dyn HostNetwork> = Arc::new(ProcHostNetwork::new(&config.proc_root));
    let reporter = Arc::new(Reporter::new(registry.clone(), config.host_id.clone(), host));

    let (shortcut_tx, mut shortcut_rx) = tokio::sync::mpsc::channel::<Node>(SHORTCUT_QUEUE_CAPACITY);
    registry.watch_container_updates(move |node| {
        if let Err(err) = shortcut_tx.try_send(node) {
            log::warn!("Dropping shortcut report: {err}");
        }
    });

    {
        let api = api::APIServer::new(registry.clone(), Arc::clone(&reporter));
        let addr = config.listen_addr;
        tokio::spawn(async move {
            if let Err(err) = api.listen(addr).await {
                log::error!("API server on {addr} failed: {err}");
            }
        });
    }

    let mut publisher = JsonLinesPublisher::stdout();
    let mut interval = tokio::time::interval(config.publish_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            _ = interval.tick() => {
                let reporter = Arc::clone(&reporter);
                let report = tokio::task::spawn_blocking(move || {
                    let before = std::time::Instant::now();
                    let report = reporter.report();
                    log::trace!("report() took {} microseconds", before.elapsed().as_micros());
                    report
                })
                .await?;
                publisher.publish(&report).await.ok_log();
            }
            Some(node) = shortcut_rx.recv() => {
                publisher.publish(&Report::shortcut(node)).await.ok_log();
            }
        }
    }

    log::info!("Shutting down");
    registry.stop().await;

    Ok(())
}

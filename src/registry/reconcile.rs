use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::{Error, Inner, Result};
use crate::container::node::deleted_node;
use crate::container::{Container, ContainerID};
use crate::error::ResultOkLogExt;
use crate::image::Image;
use crate::report::Node;
use crate::runtime::{self, ContainerState, ContainerSummary, NetworkMode};

/// Polls the runtime until a shutdown request arrives or the registry is dropped.
pub(super) async fn run(inner: Arc<Inner>, mut shutdown: mpsc::Receiver<oneshot::Sender<()>>) {
    loop {
        tokio::select! {
            ack = shutdown.recv() => return finish(&inner, ack),
            res = inner.reconcile() => {
                if let Err(err) = res {
                    log::error!("{err}");
                }
            }
        }
        tokio::select! {
            ack = shutdown.recv() => return finish(&inner, ack),
            () = tokio::time::sleep(inner.options.poll_interval) => {}
        }
    }
}

fn finish(inner: &Inner, ack: Option<oneshot::Sender<()>>) {
    log::debug!("registry loop stopping");
    inner.stop_all_stats();
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

type Previous = BTreeMap<ContainerID, Arc<Container>>;

impl Inner {
    /// One reconciliation cycle. Only the list calls fail it.
    pub(super) async fn reconcile(&self) -> Result<()> {
        let listed = self
            .client
            .list_containers()
            .await
            .map_err(Error::ListContainers)?;
        log::debug!("runtime lists {} containers", listed.len());

        let mut previous = self.reset();
        for summary in listed {
            self.reconcile_container(summary, &mut previous).await;
        }

        for (id, container) in previous {
            log::debug!("container {id} is gone");
            container.stop_gathering_stats();
            self.notify(deleted_node(id.as_ref()));
        }

        let images = self.client.list_images().await.map_err(Error::ListImages)?;
        let mut state = self.write();
        state.images.clear();
        for image in images.into_iter().map(Image::from) {
            state.images.insert(image.id.clone(), image);
        }
        // Networks are not tracked through the runtime API.
        state.networks.clear();

        Ok(())
    }

    /// Stops every collection and clears the indexes, handing back the previous containers.
    fn reset(&self) -> Previous {
        let mut state = self.write();
        for container in state.containers.values() {
            container.stop_gathering_stats();
        }
        state.pids.clear();
        state.networks.clear();
        std::mem::take(&mut state.containers)
    }

    async fn reconcile_container(&self, summary: ContainerSummary, previous: &mut Previous) {
        let id = summary.id;
        let mut detail = match self.client.container_status(&id).await {
            Ok(detail) => detail,
            Err(err) if err.is_not_found() => return self.vanished(&id, err, previous).await,
            Err(err) => return self.keep_last_known(&id, err, previous),
        };

        if !detail.pod_sandbox_id.is_empty() {
            match self
                .client
                .pod_sandbox_status(&detail.pod_sandbox_id, false)
                .await
            {
                Ok(sandbox) => {
                    if detail.ip_addresses.is_empty() {
                        detail.ip_addresses = sandbox.ip_addresses;
                    }
                    if sandbox.host_network {
                        detail.network_mode = NetworkMode::Host;
                    }
                }
                Err(err) => log::warn!(
                    "failed to get sandbox {} of container {id}: {err}",
                    detail.pod_sandbox_id
                ),
            }
        }

        let running = detail.state == ContainerState::Running;
        let container = {
            let mut state = self.write();
            let existing = state
                .containers
                .get(id.as_str())
                .cloned()
                .or_else(|| previous.remove(id.as_str()));
            let container = match existing {
                Some(container) => {
                    if let Some(old_pid) = container.pid() {
                        if state
                            .pids
                            .get(&old_pid)
                            .is_some_and(|c| Arc::ptr_eq(c, &container))
                        {
                            state.pids.remove(&old_pid);
                        }
                    }
                    container.update_state(detail);
                    container
                }
                None => match (self.factory)(detail, &self.options.container) {
                    Ok(container) => Arc::new(container),
                    Err(err) => {
                        log::warn!("skipping container {id}: {err}");
                        return;
                    }
                },
            };

            if let Some(pid) = container.pid() {
                state.pids.insert(pid, Arc::clone(&container));
            }
            state
                .containers
                .insert(container.id().clone(), Arc::clone(&container));
            container
        };

        if self.options.collect_stats {
            if running {
                container.start_gathering_stats(Arc::clone(&self.gatherer));
            } else {
                container.stop_gathering_stats();
            }
        }

        self.notify(container.node());
    }

    /// The status call failed for a reason other than a missing container.
    /// A tracked container stays indexed with its last known state.
    fn keep_last_known(&self, id: &str, err: runtime::Error, previous: &mut Previous) {
        let Some(container) = previous.remove(id) else {
            log::warn!("no status for untracked container {id}: {err}");
            return;
        };
        log::warn!("keeping last known state of container {id}: {err}");

        {
            let mut state = self.write();
            if let Some(pid) = container.pid() {
                state.pids.insert(pid, Arc::clone(&container));
            }
            state
                .containers
                .insert(container.id().clone(), Arc::clone(&container));
        }

        if self.options.collect_stats && container.state() == ContainerState::Running {
            container.start_gathering_stats(Arc::clone(&self.gatherer));
        }
    }

    /// The runtime listed `id` but no longer knows it.
    async fn vanished(&self, id: &str, err: runtime::Error, previous: &mut Previous) {
        let Some(container) = previous.remove(id) else {
            log::debug!("no status for untracked container {id}: {err}");
            return;
        };
        log::warn!("container {id} vanished: {err}");

        container.stop_gathering_stats();
        if let Some(pid) = container.pid() {
            let mut state = self.write();
            if state
                .pids
                .get(&pid)
                .is_some_and(|c| Arc::ptr_eq(c, &container))
            {
                state.pids.remove(&pid);
            }
        }
        self.notify(deleted_node(id));

        self.client
            .stop_container(id, 0)
            .await
            .ok_warn(format_args!("failed to stop vanished container {id}"));
        self.client
            .remove_container(id)
            .await
            .ok_warn(format_args!("failed to remove vanished container {id}"));
    }

    pub(super) fn notify(&self, node: Node) {
        let watchers = self.read().watchers.clone();
        for watcher in watchers {
            watcher(node.clone());
        }
    }

    pub(super) fn stop_all_stats(&self) {
        for container in self.read().containers.values() {
            container.stop_gathering_stats();
        }
    }
}

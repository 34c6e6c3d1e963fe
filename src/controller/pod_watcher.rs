//! Feeds pod watch events to the dispatcher of the owning cluster

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tracing::{debug, trace, warn};

use crate::cluster::NamespacedName;
use crate::cluster::pod_events::{PodEvent, PodEventKind};
use crate::controller::context::Context;
use crate::resources::common::{APPLICATION_LABEL, APPLICATION_NAME, CLUSTER_NAME_LABEL};

/// Translate a watch event; list bookkeeping events carry no pod
pub fn pod_event(event: &Event<Pod>) -> Option<PodEvent> {
    match event {
        Event::InitApply(pod) => Some(PodEvent::from_pod(pod, PodEventKind::Add)),
        Event::Apply(pod) => Some(PodEvent::from_pod(pod, PodEventKind::Update)),
        Event::Delete(pod) => Some(PodEvent::from_pod(pod, PodEventKind::Delete)),
        Event::Init | Event::InitDone => None,
    }
}

/// Cluster a pod belongs to, by its cluster-name label
pub fn owning_cluster(pod: &Pod) -> Option<NamespacedName> {
    let cluster = pod.labels().get(CLUSTER_NAME_LABEL)?;
    Some(NamespacedName::new(
        pod.namespace().unwrap_or_default(),
        cluster.as_str(),
    ))
}

async fn forward(ctx: &Context, event: Event<Pod>) {
    let pod = match &event {
        Event::InitApply(pod) | Event::Apply(pod) | Event::Delete(pod) => pod,
        Event::Init | Event::InitDone => return,
    };
    let Some(owner) = owning_cluster(pod) else {
        trace!(pod = %pod.name_any(), "pod without cluster label");
        return;
    };
    let Some(cluster) = ctx.cluster(&owner).await else {
        trace!(pod = %pod.name_any(), cluster = %owner, "pod of an unknown cluster");
        return;
    };
    if let Some(event) = pod_event(&event) {
        cluster.receive_pod_event(event).await;
    }
}

/// Watch Spilo pods until the stream ends
pub async fn run_pod_watcher(pods: Api<Pod>, ctx: Arc<Context>) {
    let selector = format!("{}={}", APPLICATION_LABEL, APPLICATION_NAME);
    debug!(selector = %selector, "starting pod watcher");

    let mut events = watcher::watcher(pods, WatcherConfig::default().labels(&selector))
        .default_backoff()
        .boxed();
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => forward(&ctx, event).await,
            Err(e) => warn!(error = %e, "pod watch error"),
        }
    }
}

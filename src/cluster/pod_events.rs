//! Pod event dispatch
//!
//! Watch events for a cluster's pods are queued in arrival order, keyed by
//! pod and resource version so that a redelivered event occupies a single
//! slot. One background task per cluster drains the queue and hands each
//! event to the subscriber registered for that pod, if any.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::NamespacedName;
use crate::controller::error::{Error, Result};
use crate::resources::common::ROLE_LABEL;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodEventKind {
    Add,
    Update,
    Delete,
}

/// A pod lifecycle signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodEvent {
    pub pod_name: NamespacedName,
    pub resource_version: String,
    pub kind: PodEventKind,
    /// The pod's Ready condition is true
    pub ready: bool,
    /// Value of the role label Patroni maintains
    pub role: Option<String>,
}

type PodEventKey = (NamespacedName, String);

impl PodEvent {
    pub fn from_pod(pod: &Pod, kind: PodEventKind) -> Self {
        Self {
            pod_name: NamespacedName::new(
                pod.namespace().unwrap_or_default(),
                pod.name_any(),
            ),
            resource_version: pod.resource_version().unwrap_or_default(),
            kind,
            ready: is_pod_ready(pod),
            role: pod.labels().get(ROLE_LABEL).cloned(),
        }
    }

    fn key(&self) -> PodEventKey {
        (self.pod_name.clone(), self.resource_version.clone())
    }
}

/// Check the pod's Ready condition
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// FIFO of pod events with at most one entry per (pod, resource version)
#[derive(Debug, Default)]
pub struct PodEventQueue {
    order: VecDeque<PodEventKey>,
    items: HashMap<PodEventKey, PodEvent>,
}

impl PodEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event; returns false when the same key is already queued
    pub fn push(&mut self, event: PodEvent) -> bool {
        let key = event.key();
        if self.items.contains_key(&key) {
            return false;
        }
        self.order.push_back(key.clone());
        self.items.insert(key, event);
        true
    }

    /// Remove the oldest event
    pub fn pop(&mut self) -> Option<PodEvent> {
        while let Some(key) = self.order.pop_front() {
            if let Some(event) = self.items.remove(&key) {
                return Some(event);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-cluster pod event dispatcher
pub struct PodEventDispatcher {
    queue: Mutex<PodEventQueue>,
    queued: Notify,
    subscribers: RwLock<HashMap<NamespacedName, mpsc::Sender<PodEvent>>>,
    mailbox_capacity: usize,
    handoff_timeout: Duration,
}

impl PodEventDispatcher {
    pub fn new(mailbox_capacity: usize, handoff_timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(PodEventQueue::new()),
            queued: Notify::new(),
            subscribers: RwLock::new(HashMap::new()),
            mailbox_capacity: mailbox_capacity.max(1),
            handoff_timeout,
        }
    }

    /// Queue an event for dispatch
    pub async fn submit(&self, event: PodEvent) {
        let added = self.queue.lock().await.push(event);
        if added {
            self.queued.notify_one();
        }
    }

    /// Number of events waiting for dispatch
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Register the single subscriber of a pod
    pub async fn subscribe(&self, pod: NamespacedName) -> Result<mpsc::Receiver<PodEvent>> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(&pod) {
            return Err(Error::SubscriberExists(pod.to_string()));
        }
        let (sender, receiver) = mpsc::channel(self.mailbox_capacity);
        subscribers.insert(pod, sender);
        Ok(receiver)
    }

    pub async fn unsubscribe(&self, pod: &NamespacedName) {
        if self.subscribers.write().await.remove(pod).is_none() {
            debug!(pod = %pod, "no subscriber to remove");
        }
    }

    /// Drain the queue until `stop` fires
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        debug!("pod event dispatcher started");
        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = self.next_event() => event,
            };
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.dispatch(event) => {}
            }
        }
        debug!("pod event dispatcher stopped");
    }

    async fn next_event(&self) -> PodEvent {
        loop {
            if let Some(event) = self.queue.lock().await.pop() {
                return event;
            }
            self.queued.notified().await;
        }
    }

    async fn dispatch(&self, event: PodEvent) {
        let subscriber = self.subscribers.read().await.get(&event.pod_name).cloned();
        let Some(subscriber) = subscriber else {
            trace!(pod = %event.pod_name, "no subscriber, dropping pod event");
            return;
        };

        let pod = event.pod_name.clone();
        match subscriber.send_timeout(event, self.handoff_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(
                    pod = %pod,
                    resource_version = %event.resource_version,
                    "subscriber did not take pod event in time, dropping it"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(pod = %pod, "subscriber went away, dropping pod event");
            }
        }
    }
}

/// Receive events until the pod reports ready; `None` when the
/// subscription closes first
pub async fn wait_until_ready(receiver: &mut mpsc::Receiver<PodEvent>) -> Option<PodEvent> {
    while let Some(event) = receiver.recv().await {
        if event.ready && event.kind != PodEventKind::Delete {
            return Some(event);
        }
    }
    None
}

/// Receive events until the pod has been deleted and its replacement
/// reports ready
pub async fn wait_until_recreated(receiver: &mut mpsc::Receiver<PodEvent>) -> Option<PodEvent> {
    loop {
        let event = receiver.recv().await?;
        if event.kind == PodEventKind::Delete {
            break;
        }
    }
    wait_until_ready(receiver).await
}

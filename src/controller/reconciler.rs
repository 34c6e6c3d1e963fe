//! Reconciliation of PostgresCluster resources
//!
//! Each resource maps to one [`Cluster`] instance held in the context's
//! registry. The reconciler only decides which lifecycle operation to run;
//! the operations themselves live on the instance.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{Cluster, NamespacedName};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::validation::validate_spec;
use crate::crd::PostgresCluster;
use crate::health::Operation;

/// Finalizer holding the resource until its objects are deleted
pub const FINALIZER: &str = "spilo.smoketurner.com/finalizer";

/// Main reconciliation function
#[instrument(skip(resource, ctx), fields(name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
pub async fn reconcile(resource: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action> {
    let name = NamespacedName::from_resource(resource.as_ref());
    debug!("Reconciling PostgresCluster");

    if resource.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&resource, &ctx, &name).await;
    }

    if !has_finalizer(&resource) {
        add_finalizer(&resource, &ctx, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    ctx.statuses.observe(&name, resource.status);
    ctx.statuses.publish(&ctx.health.metrics);

    if let Some(wait) = ctx.retry_delay(&name, resource.metadata.generation) {
        debug!(?wait, "last attempt failed, waiting before the next one");
        return Ok(Action::requeue(wait));
    }

    validate_spec(&resource.spec)?;
    sync_cluster(&resource, &ctx, &name).await?;
    ctx.clear_failures(&name);

    Ok(Action::requeue(ctx.config.resync_period()))
}

/// Error policy for the controller with exponential backoff
///
/// Repeated failures at the same resource generation wait longer each time.
pub fn error_policy(resource: Arc<PostgresCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = NamespacedName::from_resource(resource.as_ref());
    let delay = ctx.record_failure(&name, resource.metadata.generation, error);

    if error.is_retryable() {
        warn!(cluster = %name, error = %error, ?delay, "retryable error, requeuing");
    } else {
        error!(
            cluster = %name,
            error = %error,
            ?delay,
            "non-retryable error, requeuing for manual intervention"
        );
    }

    Action::requeue(delay)
}

/// Pick and run the lifecycle operation for a live resource
async fn sync_cluster(
    resource: &PostgresCluster,
    ctx: &Context,
    name: &NamespacedName,
) -> Result<()> {
    if let Some(cluster) = ctx.cluster(name).await {
        if !cluster.spec_differs(&resource.spec).await {
            debug!("cluster spec unchanged");
            return Ok(());
        }
        info!("cluster spec changed, updating");
        return timed(ctx, Operation::Update, cluster.update(resource)).await;
    }

    if resource.status.is_none() {
        info!("new cluster, creating");
        let cluster = ctx.register(resource.clone()).await;
        return timed(ctx, Operation::Create, cluster.create()).await;
    }

    // The resource outlived an earlier operator process
    info!(status = ?resource.status, "adopting existing cluster");
    let cluster = load_cluster(resource, ctx, name).await?;
    let result = timed(ctx, Operation::Update, cluster.update(resource)).await;
    if result.is_err() {
        // Start over from the live objects next time
        ctx.deregister(name).await;
    }
    result
}

/// Register an instance for a resource and read its live objects
async fn load_cluster(
    resource: &PostgresCluster,
    ctx: &Context,
    name: &NamespacedName,
) -> Result<Arc<Cluster>> {
    let cluster = ctx.register(resource.clone()).await;
    if let Err(e) = cluster.load_resources().await {
        ctx.deregister(name).await;
        return Err(e);
    }
    Ok(cluster)
}

async fn timed<F>(ctx: &Context, operation: Operation, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    let result = future.await;
    ctx.health.metrics.record_operation(
        operation,
        start.elapsed().as_secs_f64(),
        result.is_err(),
    );
    result
}

/// Check if the finalizer is present
fn has_finalizer(resource: &PostgresCluster) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(
    resource: &PostgresCluster,
    ctx: &Context,
    name: &NamespacedName,
) -> Result<()> {
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    ctx.clients
        .kube
        .set_cluster_finalizers(&name.namespace, &name.name, finalizers)
        .await?;

    info!("Added finalizer to {}", name);
    Ok(())
}

async fn remove_finalizer(
    resource: &PostgresCluster,
    ctx: &Context,
    name: &NamespacedName,
) -> Result<()> {
    let finalizers = resource
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    ctx.clients
        .kube
        .set_cluster_finalizers(&name.namespace, &name.name, finalizers)
        .await?;

    info!("Removed finalizer from {}", name);
    Ok(())
}

/// Delete the cluster's objects, then let the resource go
async fn handle_deletion(
    resource: &PostgresCluster,
    ctx: &Context,
    name: &NamespacedName,
) -> Result<Action> {
    if !has_finalizer(resource) {
        ctx.deregister(name).await;
        return Ok(Action::await_change());
    }
    info!("Handling deletion of {}", name);

    let cluster = match ctx.cluster(name).await {
        Some(cluster) => cluster,
        None => load_cluster(resource, ctx, name).await?,
    };
    timed(ctx, Operation::Delete, cluster.delete()).await?;

    ctx.deregister(name).await;
    ctx.clear_failures(name);
    remove_finalizer(resource, ctx, name).await?;
    info!("cluster has been deleted");

    Ok(Action::await_change())
}

pub mod clients;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use cluster::{Cluster, NamespacedName};
pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::{ClusterStatus, PostgresCluster};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::clients::{DisabledTeamsApi, HttpTeamsApi, TeamsApi};
use crate::cluster::users::{RoleMap, infrastructure_roles_from_secret};
use crate::controller::run_pod_watcher;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the operator controller.
///
/// Watches PostgresCluster resources and the Spilo pods of every cluster,
/// in the configured namespace or cluster-wide. Returns only when one of
/// the two watch streams ends.
pub async fn run_controller(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.watched_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for PostgresCluster resources (scope: {})",
        scope_msg
    );

    let clusters: Api<PostgresCluster> = scoped_api(client.clone(), namespace.as_deref());
    let pods: Api<Pod> = scoped_api(client, namespace.as_deref());

    let controller = Controller::new(clusters, WatcherConfig::default().any_semantic())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for a resource deleted in the meantime end up here
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        });

    tokio::select! {
        _ = controller => tracing::error!("Controller stream ended unexpectedly"),
        _ = run_pod_watcher(pods, ctx) => tracing::error!("Pod watcher ended unexpectedly"),
    }
}

/// Read the operator-wide infrastructure roles
///
/// No configured secret, or a configured secret that does not exist,
/// yields no roles.
pub async fn load_infrastructure_roles(
    client: Client,
    config: &OperatorConfig,
) -> Result<RoleMap> {
    let Some((namespace, name)) = config.infrastructure_roles_secret_ref() else {
        if config.infrastructure_roles_secret.is_some() {
            tracing::warn!(
                secret = ?config.infrastructure_roles_secret,
                "infrastructure roles secret must be given as namespace/name, ignoring it"
            );
        }
        return Ok(RoleMap::new());
    };

    let secrets: Api<Secret> = Api::namespaced(client, &namespace);
    match secrets.get_opt(&name).await? {
        Some(secret) => {
            let roles = infrastructure_roles_from_secret(&secret);
            tracing::info!(
                secret = %format!("{}/{}", namespace, name),
                count = roles.len(),
                "loaded infrastructure roles"
            );
            Ok(roles)
        }
        None => {
            tracing::warn!(
                secret = %format!("{}/{}", namespace, name),
                "infrastructure roles secret not found"
            );
            Ok(RoleMap::new())
        }
    }
}

/// Team directory client selected by configuration
pub fn teams_api(config: &OperatorConfig) -> Result<Arc<dyn TeamsApi>> {
    if !config.enable_teams_api {
        tracing::info!("teams API is disabled, no human users will be created");
        return Ok(Arc::new(DisabledTeamsApi));
    }
    Ok(Arc::new(HttpTeamsApi::new(
        &config.teams_api_url,
        config.teams_api_token.clone(),
    )?))
}

//! Lifecycle of one Spilo cluster
//!
//! A [`Cluster`] owns the observed state of the objects that make up one
//! PostgreSQL cluster and drives them through Create, Update and Delete.
//! Every lifecycle call holds the cluster's state lock for its whole
//! duration, so calls for the same cluster never interleave. Pod events
//! reach the cluster through its [`PodEventDispatcher`], which runs
//! independently of that lock so that a lifecycle call can wait for pods.

pub mod compare;
pub mod pod_events;
pub mod users;
pub mod volumes;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use kube::ResourceExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clients::{Collaborators, DatabaseConnection};
use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::state_machine::is_valid_transition;
use crate::crd::{ClusterStatus, PostgresCluster, PostgresClusterSpec};
use crate::resources::common::{MASTER_ROLE, ROLE_LABEL, label_selector, pod_name};
use crate::resources::secret::{PASSWORD_KEY, generate_user_secret, secret_value};
use crate::resources::service::{generate_endpoint, generate_service};
use crate::resources::statefulset::generate_statefulset;

use self::compare::{CompareOutcome, compare_service, compare_statefulset, compare_volume};
use self::pod_events::{
    PodEvent, PodEventDispatcher, is_pod_ready, wait_until_ready, wait_until_recreated,
};
use self::users::{RoleMap, RoleModel, RoleOrigin};
use self::volumes::VolumeResizer;

/// Namespace-qualified object name
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_resource<K: ResourceExt>(resource: &K) -> Self {
        Self::new(resource.namespace().unwrap_or_default(), resource.name_any())
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Last known state of the objects a cluster owns
#[derive(Clone, Debug, Default)]
pub struct ObservedResources {
    pub endpoint: Option<Endpoints>,
    pub service: Option<Service>,
    /// Credential secrets by name
    pub secrets: BTreeMap<String, Secret>,
    pub statefulset: Option<StatefulSet>,
}

struct ClusterState {
    resource: PostgresCluster,
    /// Engine version the pods actually run
    version: String,
    status: Option<ClusterStatus>,
    observed: ObservedResources,
    roles: RoleModel,
    master_less: bool,
}

/// One managed PostgreSQL cluster
pub struct Cluster {
    name: NamespacedName,
    config: Arc<OperatorConfig>,
    infrastructure_roles: Arc<RoleMap>,
    clients: Collaborators,
    state: Mutex<ClusterState>,
    dispatcher: Arc<PodEventDispatcher>,
    stop: CancellationToken,
}

impl Cluster {
    pub fn new(
        resource: PostgresCluster,
        config: Arc<OperatorConfig>,
        infrastructure_roles: Arc<RoleMap>,
        clients: Collaborators,
    ) -> Self {
        let dispatcher = Arc::new(PodEventDispatcher::new(
            config.pod_event_mailbox,
            config.pod_event_handoff_timeout(),
        ));
        let state = ClusterState {
            version: resource.spec.postgresql.version.clone(),
            status: resource.status,
            observed: ObservedResources::default(),
            roles: RoleModel::default(),
            master_less: false,
            resource,
        };

        Self {
            name: NamespacedName::from_resource(&state.resource),
            config,
            infrastructure_roles,
            clients,
            state: Mutex::new(state),
            dispatcher,
            stop: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &NamespacedName {
        &self.name
    }

    /// Start delivering pod events
    pub fn run(&self) {
        tokio::spawn(self.dispatcher.clone().run(self.stop.clone()));
    }

    /// Stop delivering pod events
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Queue a pod event for delivery to whoever waits on the pod
    pub async fn receive_pod_event(&self, event: PodEvent) {
        self.dispatcher.submit(event).await;
    }

    /// Spec the cluster was last created or updated with
    pub async fn spec(&self) -> PostgresClusterSpec {
        self.state.lock().await.resource.spec.clone()
    }

    pub async fn spec_differs(&self, spec: &PostgresClusterSpec) -> bool {
        self.state.lock().await.resource.spec != *spec
    }

    pub async fn status(&self) -> Option<ClusterStatus> {
        self.state.lock().await.status
    }

    pub async fn roles(&self) -> RoleModel {
        self.state.lock().await.roles.clone()
    }

    pub async fn observed(&self) -> ObservedResources {
        self.state.lock().await.observed.clone()
    }

    /// Create every object of the cluster and its database roles
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn create(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        self.set_status(&mut state, ClusterStatus::Creating).await;
        let result = self.create_steps(&mut state).await;
        match &result {
            Ok(()) => self.set_status(&mut state, ClusterStatus::Running).await,
            Err(e) => {
                error!(error = %e, "failed to create cluster");
                self.set_status(&mut state, ClusterStatus::AddFailed).await;
            }
        }
        result
    }

    async fn create_steps(&self, state: &mut ClusterState) -> Result<()> {
        let ns = &self.name.namespace;
        let kube = &self.clients.kube;

        let endpoint = kube
            .create_endpoint(ns, &generate_endpoint(&state.resource))
            .await
            .context("could not create endpoint")?;
        info!(endpoint = %endpoint.name_any(), "endpoint has been successfully created");
        state.observed.endpoint = Some(endpoint);

        let service = generate_service(&state.resource, &state.resource.spec.allowed_source_ranges);
        let service = kube
            .create_service(ns, &service)
            .await
            .context("could not create service")?;
        info!(service = %service.name_any(), "service has been successfully created");
        state.observed.service = Some(service);

        state.roles = RoleModel::build(
            &self.config,
            &self.infrastructure_roles,
            &state.resource.spec,
            self.clients.teams.as_ref(),
        )
        .await?;
        info!("users have been initialized");

        self.apply_secrets(state)
            .await
            .context("could not create secrets")?;
        info!("secrets have been successfully created");

        let spec = state.resource.spec.with_version(&state.version);
        let statefulset = generate_statefulset(&state.resource, &spec, &self.config);
        let statefulset = kube
            .create_statefulset(ns, &statefulset)
            .await
            .context("could not create statefulset")?;
        info!(statefulset = %statefulset.name_any(), "statefulset has been successfully created");
        state.observed.statefulset = Some(statefulset);

        info!("waiting for cluster being ready");
        let has_master = self
            .wait_pods_ready(spec.number_of_instances)
            .await
            .context("pods are not ready")?;
        state.master_less = !has_master;
        info!("pods are ready");

        if state.master_less {
            warn!("cluster is masterless");
        } else if !self.config.enable_db_access {
            debug!("database access is disabled, not creating roles");
        } else {
            let connection = self
                .connect_as_superuser(&state.roles)
                .await
                .context("could not init db connection")?;
            create_roles(connection.as_ref(), &state.roles)
                .await
                .context("could not create users")?;
            info!("users have been successfully created");
        }

        log_resources(&state.observed);
        Ok(())
    }

    /// Store one credentials secret per role with a password, adopting
    /// passwords of secrets that already exist
    async fn apply_secrets(&self, state: &mut ClusterState) -> Result<()> {
        let ns = &self.name.namespace;
        let roles: Vec<_> = state.roles.iter().cloned().collect();

        for role in roles {
            let Some(secret) = generate_user_secret(&state.resource, &role) else {
                continue;
            };
            let secret_name = secret.name_any();

            let stored = match self.clients.kube.create_secret(ns, &secret).await {
                Ok(created) => {
                    debug!(secret = %secret_name, user = %role.name, "created secret");
                    created
                }
                Err(e) if e.is_already_exists() => {
                    debug!(secret = %secret_name, "secret already exists, fetching its password");
                    let existing = self
                        .clients
                        .kube
                        .get_secret(ns, &secret_name)
                        .await
                        .context(format!("could not get current secret {}", secret_name))?
                        .ok_or(e)?;
                    if let Some(password) = secret_value(&existing, PASSWORD_KEY) {
                        state.roles.adopt_password(&role.name, password);
                    }
                    existing
                }
                Err(e) => {
                    return Err(e).context(format!("could not create secret for user {}", role.name));
                }
            };
            state.observed.secrets.insert(secret_name, stored);
        }
        Ok(())
    }

    /// Wait until every pod of the stateful set is ready; returns whether a
    /// master is among them
    async fn wait_pods_ready(&self, instances: i32) -> Result<bool> {
        let expected: Vec<_> = (0..instances.max(0))
            .map(|ordinal| {
                NamespacedName::new(&self.name.namespace, pod_name(&self.name.name, ordinal))
            })
            .collect();

        let mut subscriptions = Vec::with_capacity(expected.len());
        for pod in &expected {
            match self.dispatcher.subscribe(pod.clone()).await {
                Ok(receiver) => subscriptions.push((pod.clone(), receiver)),
                Err(e) => {
                    for (subscribed, _) in &subscriptions {
                        self.dispatcher.unsubscribe(subscribed).await;
                    }
                    return Err(e);
                }
            }
        }

        let timeout = self.config.ready_wait_timeout();
        let result = tokio::time::timeout(timeout, self.await_pods_ready(subscriptions)).await;

        for pod in &expected {
            self.dispatcher.unsubscribe(pod).await;
        }

        result.map_err(|_| {
            Error::Timeout(format!(
                "pods of cluster {} not ready after {:?}",
                self.name, timeout
            ))
        })?
    }

    async fn await_pods_ready(
        &self,
        subscriptions: Vec<(NamespacedName, mpsc::Receiver<PodEvent>)>,
    ) -> Result<bool> {
        let pods = self
            .clients
            .kube
            .list_pods(&self.name.namespace, &label_selector(&self.name.name))
            .await
            .context("could not list pods")?;

        let mut roles: HashMap<String, Option<String>> = pods
            .iter()
            .filter(|pod| is_pod_ready(pod))
            .map(|pod| (pod.name_any(), pod.labels().get(ROLE_LABEL).cloned()))
            .collect();

        let pending = subscriptions
            .into_iter()
            .filter(|(pod, _)| !roles.contains_key(&pod.name))
            .map(|(pod, mut receiver)| async move {
                wait_until_ready(&mut receiver)
                    .await
                    .ok_or_else(|| Error::Timeout(format!("subscription of pod {} closed", pod)))
            });

        for event in try_join_all(pending).await? {
            debug!(pod = %event.pod_name, role = ?event.role, "pod is ready");
            roles.insert(event.pod_name.name, event.role);
        }

        Ok(roles
            .values()
            .any(|role| role.as_deref() == Some(MASTER_ROLE)))
    }

    async fn connect_as_superuser(&self, roles: &RoleModel) -> Result<Box<dyn DatabaseConnection>> {
        let superuser = roles
            .get(&self.config.super_username)
            .ok_or(Error::MissingObjectKey("superuser role"))?;
        let password = superuser
            .password
            .as_deref()
            .ok_or(Error::MissingObjectKey("superuser password"))?;

        self.clients
            .database
            .connect(&self.name, &superuser.name, password)
            .await
    }

    /// Bring the cluster's objects in line with a changed resource
    #[instrument(skip(self, resource), fields(cluster = %self.name))]
    pub async fn update(&self, resource: &PostgresCluster) -> Result<()> {
        let mut state = self.state.lock().await;

        self.set_status(&mut state, ClusterStatus::Updating).await;
        debug!(
            from = ?state.resource.resource_version(),
            to = ?resource.resource_version(),
            "cluster update"
        );

        match self.update_steps(&mut state, resource).await {
            Ok(()) => {
                state.resource = resource.clone();
                self.set_status(&mut state, ClusterStatus::Running).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to update cluster");
                self.set_status(&mut state, ClusterStatus::UpdateFailed).await;
                Err(e)
            }
        }
    }

    async fn update_steps(&self, state: &mut ClusterState, resource: &PostgresCluster) -> Result<()> {
        let ns = &self.name.namespace;
        let kube = &self.clients.kube;

        // The engine version of a running cluster cannot change
        let requested_version = &resource.spec.postgresql.version;
        let spec = resource.spec.with_version(&state.version);

        let desired_service = generate_service(resource, &spec.allowed_source_ranges);
        match state.observed.service.as_ref() {
            Some(live) => {
                let cmp = compare_service(live, &desired_service);
                if !cmp.matched {
                    info!(reasons = ?cmp.reasons, "service needs an update");
                    let updated = kube
                        .update_service(ns, &desired_service)
                        .await
                        .context("could not update service")?;
                    info!(service = %updated.name_any(), "service has been updated");
                    state.observed.service = Some(updated);
                }
            }
            None => {
                warn!("service is missing, creating it");
                let created = kube
                    .create_service(ns, &desired_service)
                    .await
                    .context("could not create service")?;
                state.observed.service = Some(created);
            }
        }

        let cmp = compare_volume(&state.resource.spec.volume, &spec.volume);
        if !cmp.matched {
            info!(reasons = ?cmp.reasons, "volumes need an update");
            let volumes = kube
                .list_persistent_volumes(ns, &label_selector(&self.name.name))
                .await
                .context("could not list persistent volumes")?;
            let resizer = VolumeResizer {
                kube: kube.as_ref(),
                storage: self.clients.storage.as_ref(),
                exec: self.clients.exec.as_ref(),
                pgdata_path: &self.config.pgdata_path,
            };
            resizer
                .resize_all(volumes, &spec.volume.size)
                .await
                .context("could not update volumes")?;
            info!("volumes have been updated successfully");
        }

        let desired = generate_statefulset(resource, &spec, &self.config);
        let mut rolling_update = false;
        match state.observed.statefulset.as_ref() {
            Some(live) => match compare_statefulset(live, &desired) {
                CompareOutcome::NoLiveContainers => {
                    warn!(
                        statefulset = %live.name_any(),
                        "live statefulset has no containers, leaving it untouched"
                    );
                }
                CompareOutcome::Compared(cmp) if !cmp.matched => {
                    info!(remediation = ?cmp.remediation(), reasons = ?cmp.reasons, "statefulset needs an update");
                    let applied = if cmp.replace {
                        self.replace_statefulset(&desired)
                            .await
                            .context("could not replace statefulset")?
                    } else {
                        kube.update_statefulset(ns, &desired)
                            .await
                            .context("could not update statefulset")?
                    };
                    info!(statefulset = %applied.name_any(), "statefulset has been updated");
                    state.observed.statefulset = Some(applied);
                    rolling_update = cmp.rolling_update;
                }
                CompareOutcome::Compared(_) => {}
            },
            None => {
                warn!("statefulset is missing, creating it");
                let created = kube
                    .create_statefulset(ns, &desired)
                    .await
                    .context("could not create statefulset")?;
                state.observed.statefulset = Some(created);
            }
        }

        if *requested_version != state.version {
            warn!(
                from = %state.version,
                to = %requested_version,
                "postgresql version change is not allowed"
            );
        }

        if rolling_update {
            info!("rolling update is needed");
            self.recreate_pods()
                .await
                .context("could not recreate pods")?;
            info!("rolling update has been finished");
        }

        Ok(())
    }

    /// Delete the stateful set leaving pods and volumes behind, then
    /// create the desired one
    async fn replace_statefulset(&self, desired: &StatefulSet) -> Result<StatefulSet> {
        let ns = &self.name.namespace;
        let name = desired.name_any();
        let kube = &self.clients.kube;

        debug!(statefulset = %name, "replacing statefulset");
        kube.delete_statefulset(ns, &name, true)
            .await
            .context("could not delete statefulset")?;
        kube.wait_statefulset_deleted(ns, &name, self.config.resource_wait_timeout())
            .await
            .context("could not wait for statefulset deletion")?;
        kube.create_statefulset(ns, desired)
            .await
            .context("could not create statefulset")
    }

    /// Restart every pod: replicas first, the master last
    async fn recreate_pods(&self) -> Result<()> {
        let pods = self
            .clients
            .kube
            .list_pods(&self.name.namespace, &label_selector(&self.name.name))
            .await
            .context("could not list pods")?;

        let (masters, replicas): (Vec<Pod>, Vec<Pod>) = pods
            .into_iter()
            .partition(|pod| pod.labels().get(ROLE_LABEL).map(String::as_str) == Some(MASTER_ROLE));
        if masters.is_empty() {
            warn!("no master pod in the cluster");
        }

        for pod in replicas.iter().chain(masters.iter()) {
            self.recreate_pod(&pod.name_any()).await?;
        }
        Ok(())
    }

    async fn recreate_pod(&self, name: &str) -> Result<()> {
        let pod = NamespacedName::new(&self.name.namespace, name);
        let mut receiver = self.dispatcher.subscribe(pod.clone()).await?;

        let result = async {
            self.clients
                .kube
                .delete_pod(&pod.namespace, &pod.name)
                .await
                .context(format!("could not delete pod {}", pod))?;

            let timeout = self.config.pod_label_wait_timeout();
            tokio::time::timeout(timeout, wait_until_recreated(&mut receiver))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("pod {} not ready after {:?}", pod, timeout))
                })?
                .ok_or_else(|| Error::Timeout(format!("subscription of pod {} closed", pod)))
        }
        .await;

        self.dispatcher.unsubscribe(&pod).await;
        let event = result?;
        info!(pod = %pod, role = ?event.role, "pod has been recreated");
        Ok(())
    }

    /// Delete the endpoint, service, stateful set and secrets, in that order
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn delete(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let ns = &self.name.namespace;
        let name = &self.name.name;
        let kube = &self.clients.kube;

        kube.delete_endpoint(ns, name)
            .await
            .context("could not delete endpoint")?;
        state.observed.endpoint = None;
        info!("endpoint has been deleted");

        kube.delete_service(ns, name)
            .await
            .context("could not delete service")?;
        state.observed.service = None;
        info!("service has been deleted");

        kube.delete_statefulset(ns, name, false)
            .await
            .context("could not delete statefulset")?;
        state.observed.statefulset = None;
        info!("statefulset has been deleted");

        let secrets: Vec<String> = state.observed.secrets.keys().cloned().collect();
        for secret in secrets {
            kube.delete_secret(ns, &secret)
                .await
                .context("could not delete secret")?;
            state.observed.secrets.remove(&secret);
            debug!(secret = %secret, "secret has been deleted");
        }
        info!("secrets have been deleted");

        Ok(())
    }

    /// Read the live objects of a cluster the operator did not create in
    /// this process
    #[instrument(skip(self), fields(cluster = %self.name))]
    pub async fn load_resources(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let ns = &self.name.namespace;
        let name = &self.name.name;
        let kube = &self.clients.kube;

        state.observed.endpoint = kube
            .get_endpoint(ns, name)
            .await
            .context("could not get endpoint")?;
        state.observed.service = kube
            .get_service(ns, name)
            .await
            .context("could not get service")?;
        state.observed.statefulset = kube
            .get_statefulset(ns, name)
            .await
            .context("could not get statefulset")?;
        state.observed.secrets = kube
            .list_secrets(ns, &label_selector(name))
            .await
            .context("could not list secrets")?
            .into_iter()
            .map(|secret| (secret.name_any(), secret))
            .collect();

        if let Some(version) = state
            .observed
            .statefulset
            .as_ref()
            .and_then(running_version)
        {
            state.version = version;
        }

        log_resources(&state.observed);
        Ok(())
    }

    /// Persist the status; failures are logged and otherwise ignored
    async fn set_status(&self, state: &mut ClusterState, status: ClusterStatus) {
        if !is_valid_transition(state.status, status) {
            warn!(from = ?state.status, to = %status, "unexpected cluster status transition");
        }

        match self
            .clients
            .kube
            .patch_cluster_status(&self.name.namespace, &self.name.name, status)
            .await
        {
            Ok(()) => debug!(status = %status, "cluster status set"),
            Err(e) if e.is_not_found() => warn!("could not set status for the non-existing cluster"),
            Err(e) => warn!(error = %e, status = %status, "could not set status for cluster"),
        }
        state.status = Some(status);
    }
}

/// Create every non-system role the database does not have yet
async fn create_roles(connection: &dyn DatabaseConnection, roles: &RoleModel) -> Result<()> {
    let existing = connection.existing_roles().await?;

    for role in roles.iter() {
        if role.origin == RoleOrigin::System {
            continue;
        }
        if existing.contains(&role.name) {
            debug!(user = %role.name, "role already exists");
            continue;
        }
        connection.create_role(role).await?;
        debug!(user = %role.name, origin = ?role.origin, "created role");
    }
    Ok(())
}

/// `PGVERSION` of the live database container
fn running_version(statefulset: &StatefulSet) -> Option<String> {
    statefulset
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|env| env.name == "PGVERSION")?
        .value
        .clone()
}

fn log_resources(observed: &ObservedResources) {
    if let Some(endpoint) = &observed.endpoint {
        info!(endpoint = %endpoint.name_any(), uid = ?endpoint.uid(), "found endpoint");
    }
    if let Some(service) = &observed.service {
        info!(service = %service.name_any(), uid = ?service.uid(), "found service");
    }
    if let Some(statefulset) = &observed.statefulset {
        info!(statefulset = %statefulset.name_any(), uid = ?statefulset.uid(), "found statefulset");
    }
    for (name, secret) in &observed.secrets {
        info!(secret = %name, uid = ?secret.uid(), "found secret");
    }
}

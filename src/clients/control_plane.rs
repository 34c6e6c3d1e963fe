use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Endpoints, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::KubeClient;
use crate::controller::error::{Error, Result};
use crate::crd::{ClusterStatus, PostgresCluster};
use crate::resources::FIELD_MANAGER;

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// kube-rs backed control-plane client
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Treat 404 on delete as success
fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        other => Ok(other?),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn create_endpoint(&self, namespace: &str, endpoint: &Endpoints) -> Result<Endpoints> {
        let api: Api<Endpoints> = self.api(namespace);
        Ok(api.create(&PostParams::default(), endpoint).await?)
    }

    async fn get_endpoint(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let api: Api<Endpoints> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_endpoint(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Endpoints> = self.api(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = self.api(namespace);
        Ok(api.create(&PostParams::default(), service).await?)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = self.api(namespace);
        let patch = json!({ "spec": service.spec });
        Ok(api
            .patch(
                &service.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Service> = self.api(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = self.api(namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = self.api(namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = self.api(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn create_statefulset(
        &self,
        namespace: &str,
        statefulset: &StatefulSet,
    ) -> Result<StatefulSet> {
        let api: Api<StatefulSet> = self.api(namespace);
        Ok(api.create(&PostParams::default(), statefulset).await?)
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_statefulset(
        &self,
        namespace: &str,
        statefulset: &StatefulSet,
    ) -> Result<StatefulSet> {
        let api: Api<StatefulSet> = self.api(namespace);
        let patch = json!({ "spec": statefulset.spec });
        Ok(api
            .patch(
                &statefulset.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str, orphan: bool) -> Result<()> {
        let api: Api<StatefulSet> = self.api(namespace);
        let params = if orphan {
            DeleteParams::orphan()
        } else {
            DeleteParams::default()
        };
        ignore_not_found(api.delete(name, &params).await.map(|_| ()))
    }

    async fn wait_statefulset_deleted(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<StatefulSet> = self.api(namespace);
        let poll = async {
            loop {
                if api.get_opt(name).await?.is_none() {
                    return Ok::<_, Error>(());
                }
                debug!(statefulset = %name, "waiting for stateful set deletion");
                tokio::time::sleep(DELETE_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            Error::Timeout(format!("stateful set {}/{} still present", namespace, name))
        })?
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = self.api(namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = self.api(namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_persistent_volumes(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolume>> {
        let claims: Api<PersistentVolumeClaim> = self.api(namespace);
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());

        let mut result = Vec::new();
        for claim in claims
            .list(&ListParams::default().labels(selector))
            .await?
            .items
        {
            let Some(volume_name) = claim.spec.and_then(|s| s.volume_name) else {
                continue;
            };
            result.push(volumes.get(&volume_name).await?);
        }
        Ok(result)
    }

    async fn update_persistent_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api
            .replace(&volume.name_any(), &PostParams::default(), volume)
            .await?)
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: ClusterStatus,
    ) -> Result<()> {
        let api: Api<PostgresCluster> = self.api(namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_cluster_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let api: Api<PostgresCluster> = self.api(namespace);
        let patch = if finalizers.is_empty() {
            json!({ "metadata": { "finalizers": null } })
        } else {
            json!({ "metadata": { "finalizers": finalizers } })
        };
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

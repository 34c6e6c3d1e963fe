//! Command execution in database pods via the Kubernetes exec API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, AttachParams};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::PodExecutor;
use crate::cluster::NamespacedName;
use crate::controller::error::{Error, Result};
use crate::resources::common::POSTGRES_CONTAINER;

/// kube-rs websocket exec into the `postgres` container
pub struct KubePodExecutor {
    client: Client,
}

impl KubePodExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodExecutor for KubePodExecutor {
    async fn exec(&self, pod: &NamespacedName, command: Vec<String>) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let attach_params = AttachParams {
            container: Some(POSTGRES_CONTAINER.to_string()),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        debug!(pod = %pod, ?command, "executing remote command");
        let mut attached = pods.exec(&pod.name, command, &attach_params).await?;

        let stdout = attached
            .stdout()
            .ok_or_else(|| Error::Exec("failed to get stdout from exec".to_string()))?;
        let stderr = attached
            .stderr()
            .ok_or_else(|| Error::Exec("failed to get stderr from exec".to_string()))?;

        let (stdout_output, stderr_output) =
            tokio::try_join!(read_stream(stdout), read_stream(stderr))?;

        let status = attached
            .take_status()
            .ok_or_else(|| Error::Exec("failed to get status from exec".to_string()))?;

        if let Some(status) = status.await
            && status.status.as_deref() != Some("Success")
        {
            let message = if stderr_output.is_empty() {
                format!("command failed with status: {:?}", status)
            } else {
                stderr_output
            };
            return Err(Error::Exec(message));
        }

        if !stderr_output.is_empty() {
            return Err(Error::Exec(format!("remote command stderr: {}", stderr_output)));
        }

        Ok(stdout_output)
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| Error::Exec(format!("failed to read exec stream: {}", e)))?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

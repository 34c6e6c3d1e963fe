//! Team directory lookups

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::TeamsApi;
use crate::controller::error::{Error, Result};

#[derive(Deserialize, Debug)]
struct TeamInfo {
    #[serde(default, rename = "member")]
    members: Vec<String>,
}

/// HTTP client for the team directory (`GET <base>/teams/<id>`)
pub struct HttpTeamsApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTeamsApi {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::TeamsApi(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl TeamsApi for HttpTeamsApi {
    async fn team_members(&self, team_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/teams/{}", self.base_url, team_id);
        debug!(url = %url, "fetching team members");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::TeamsApi(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TeamsApi(format!(
                "team {} lookup failed: {} - {}",
                team_id, status, body
            )));
        }

        let team: TeamInfo = response
            .json()
            .await
            .map_err(|e| Error::TeamsApi(format!("invalid team response: {}", e)))?;

        Ok(team.members)
    }
}

/// Directory used when team lookups are turned off; no human roles are created
pub struct DisabledTeamsApi;

#[async_trait]
impl TeamsApi for DisabledTeamsApi {
    async fn team_members(&self, _team_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

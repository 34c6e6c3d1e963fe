//! Operator configuration
//!
//! Every setting can be passed as a command line flag or through the
//! environment variable named next to it.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "spilo-operator", version, about)]
pub struct OperatorConfig {
    /// Name of the database superuser role
    #[arg(long, env = "SUPER_USERNAME", default_value = "postgres")]
    pub super_username: String,

    /// Name of the streaming replication role
    #[arg(long, env = "REPLICATION_USERNAME", default_value = "standby")]
    pub replication_username: String,

    /// Group every team member role is made a member of
    #[arg(long, env = "PAM_ROLE_NAME", default_value = "zalandos")]
    pub pam_role_name: String,

    /// Length of generated role passwords
    #[arg(long, env = "PASSWORD_LENGTH", default_value_t = 64)]
    pub password_length: usize,

    /// Connect to new clusters and create their roles
    #[arg(long, env = "ENABLE_DB_ACCESS", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_db_access: bool,

    /// Look up team members to create human roles
    #[arg(long, env = "ENABLE_TEAMS_API", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_teams_api: bool,

    /// Base URL of the team directory
    #[arg(long, env = "TEAMS_API_URL", default_value = "https://teams.example.com/api/")]
    pub teams_api_url: String,

    /// Bearer token for the team directory
    #[arg(long, env = "TEAMS_API_TOKEN")]
    pub teams_api_token: Option<String>,

    /// Default Spilo image
    #[arg(long, env = "DOCKER_IMAGE", default_value = "ghcr.io/zalando/spilo-16:3.3-p1")]
    pub docker_image: String,

    /// Service account the database pods run as
    #[arg(long, env = "POD_SERVICE_ACCOUNT_NAME", default_value = "postgres-pod")]
    pub pod_service_account_name: String,

    /// Termination grace period of database pods, in seconds
    #[arg(long, env = "POD_TERMINATION_GRACE_PERIOD", default_value_t = 300)]
    pub pod_termination_grace_period: i64,

    /// Mount path of the data volume inside the database container
    #[arg(long, env = "PGDATA_PATH", default_value = "/home/postgres/pgdata")]
    pub pgdata_path: String,

    /// Seconds to wait for all pods of a new cluster to become ready
    #[arg(long, env = "READY_WAIT_TIMEOUT", default_value_t = 600)]
    pub ready_wait_timeout_secs: u64,

    /// Seconds to wait for a recreated pod to become ready
    #[arg(long, env = "POD_LABEL_WAIT_TIMEOUT", default_value_t = 600)]
    pub pod_label_wait_timeout_secs: u64,

    /// Seconds to wait for a deleted object to disappear
    #[arg(long, env = "RESOURCE_CHECK_TIMEOUT", default_value_t = 600)]
    pub resource_wait_timeout_secs: u64,

    /// Per-pod pod event mailbox size
    #[arg(long, env = "POD_EVENT_MAILBOX", default_value_t = 16)]
    pub pod_event_mailbox: usize,

    /// Seconds the dispatcher waits on a full mailbox before dropping the event
    #[arg(long, env = "POD_EVENT_HANDOFF_TIMEOUT", default_value_t = 30)]
    pub pod_event_handoff_timeout_secs: u64,

    /// Secret with infrastructure roles, as `namespace/name`
    #[arg(long, env = "INFRASTRUCTURE_ROLES_SECRET")]
    pub infrastructure_roles_secret: Option<String>,

    /// Restrict the operator to one namespace
    #[arg(long, env = "WATCHED_NAMESPACE")]
    pub watched_namespace: Option<String>,

    /// Seconds between periodic resyncs of a healthy cluster
    #[arg(long, env = "RESYNC_PERIOD", default_value_t = 1800)]
    pub resync_period_secs: u64,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value_t = false, action = clap::ArgAction::Set)]
    pub log_json: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::parse_from(["spilo-operator"])
    }
}

impl OperatorConfig {
    pub fn ready_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_wait_timeout_secs)
    }

    pub fn pod_label_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_label_wait_timeout_secs)
    }

    pub fn resource_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_wait_timeout_secs)
    }

    pub fn pod_event_handoff_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_event_handoff_timeout_secs)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Namespace and name of the infrastructure roles secret
    pub fn infrastructure_roles_secret_ref(&self) -> Option<(String, String)> {
        let reference = self.infrastructure_roles_secret.as_deref()?;
        match reference.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Some((ns.to_string(), name.to_string()))
            }
            _ => None,
        }
    }
}

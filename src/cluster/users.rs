//! Database role model
//!
//! Roles come from four sources, merged in a fixed order where a later
//! source overwrites an earlier one on a name collision: system roles,
//! infrastructure roles, robot roles from the cluster resource, and human
//! roles for every member of the owning team.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::Secret;
use regex::Regex;
use tracing::debug;

use crate::clients::TeamsApi;
use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::PostgresClusterSpec;
use crate::resources::secret::{generate_password, secret_value};

static ALPHA_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new("^[a-zA-Z][a-zA-Z0-9]*$").expect("valid username pattern")
});

pub const ROLE_FLAG_SUPERUSER: &str = "SUPERUSER";
pub const ROLE_FLAG_INHERIT: &str = "INHERIT";
pub const ROLE_FLAG_LOGIN: &str = "LOGIN";
pub const ROLE_FLAG_NOLOGIN: &str = "NOLOGIN";
pub const ROLE_FLAG_CREATEROLE: &str = "CREATEROLE";
pub const ROLE_FLAG_CREATEDB: &str = "CREATEDB";
pub const ROLE_FLAG_REPLICATION: &str = "REPLICATION";
pub const ROLE_FLAG_BYPASSRLS: &str = "BYPASSRLS";

const KNOWN_FLAGS: [&str; 7] = [
    ROLE_FLAG_SUPERUSER,
    ROLE_FLAG_INHERIT,
    ROLE_FLAG_LOGIN,
    ROLE_FLAG_CREATEROLE,
    ROLE_FLAG_CREATEDB,
    ROLE_FLAG_REPLICATION,
    ROLE_FLAG_BYPASSRLS,
];

/// Where a role definition came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoleOrigin {
    System,
    Infrastructure,
    Robot,
    Human,
}

/// A database role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PgUser {
    pub name: String,
    /// Absent for roles authenticated outside the database
    pub password: Option<String>,
    /// Normalized, sorted role flags
    pub flags: Vec<String>,
    /// Groups the role is granted
    pub member_of: Vec<String>,
    pub origin: RoleOrigin,
}

/// Username -> role
pub type RoleMap = BTreeMap<String, PgUser>;

/// Check a username against `^[a-zA-Z][a-zA-Z0-9]*$`
pub fn is_valid_username(username: &str) -> bool {
    ALPHA_NUMERIC.is_match(username)
}

/// Validate and canonicalize role flags
///
/// Flags are upper-cased and de-duplicated. Unknown flags, non
/// alphanumeric flags and a flag combined with its `NO` counterpart are
/// rejected. `LOGIN` is implied unless `NOLOGIN` is requested.
pub fn normalize_user_flags(flags: &[String]) -> std::result::Result<Vec<String>, String> {
    let mut normalized = BTreeSet::new();

    for flag in flags {
        if !flag.chars().all(|c| c.is_ascii_alphanumeric()) || flag.is_empty() {
            return Err(format!("user flag '{}' is not alphanumeric", flag));
        }
        let flag = flag.to_uppercase();
        let base = flag.strip_prefix("NO").unwrap_or(&flag);
        if !KNOWN_FLAGS.contains(&base) && !KNOWN_FLAGS.contains(&flag.as_str()) {
            return Err(format!("user flag '{}' is not supported", flag));
        }
        normalized.insert(flag);
    }

    for flag in KNOWN_FLAGS {
        let negated = format!("NO{}", flag);
        if normalized.contains(flag) && normalized.contains(&negated) {
            return Err(format!("conflicting user flags: '{}' and '{}'", flag, negated));
        }
    }

    if !normalized.contains(ROLE_FLAG_NOLOGIN) {
        normalized.insert(ROLE_FLAG_LOGIN.to_string());
    }

    Ok(normalized.into_iter().collect())
}

fn validated_flags(username: &str, flags: &[String]) -> Result<Vec<String>> {
    if !is_valid_username(username) {
        return Err(Error::InvalidUsername(username.to_string()));
    }
    normalize_user_flags(flags).map_err(|reason| Error::InvalidUserFlags {
        user: username.to_string(),
        flags: flags.to_vec(),
        reason,
    })
}

/// Superuser and replication roles, with fresh passwords
///
/// No flags: their privileges are granted by the database bootstrap.
pub fn system_roles(config: &OperatorConfig) -> RoleMap {
    [&config.super_username, &config.replication_username]
        .into_iter()
        .map(|name| {
            (
                name.clone(),
                PgUser {
                    name: name.clone(),
                    password: Some(generate_password(config.password_length)),
                    flags: Vec::new(),
                    member_of: Vec::new(),
                    origin: RoleOrigin::System,
                },
            )
        })
        .collect()
}

/// Validate the operator-wide infrastructure roles
pub fn infrastructure_roles(defined: &RoleMap) -> Result<RoleMap> {
    defined
        .iter()
        .map(|(username, role)| {
            let flags = validated_flags(username, &role.flags)?;
            Ok((
                username.clone(),
                PgUser {
                    name: username.clone(),
                    flags,
                    origin: RoleOrigin::Infrastructure,
                    ..role.clone()
                },
            ))
        })
        .collect()
}

/// Roles requested in the cluster resource, with fresh passwords
pub fn robot_roles(spec: &PostgresClusterSpec, password_length: usize) -> Result<RoleMap> {
    spec.users
        .iter()
        .map(|(username, flags)| {
            let flags = validated_flags(username, flags)?;
            Ok((
                username.clone(),
                PgUser {
                    name: username.clone(),
                    password: Some(generate_password(password_length)),
                    flags,
                    member_of: Vec::new(),
                    origin: RoleOrigin::Robot,
                },
            ))
        })
        .collect()
}

/// One superuser login role per team member, granted the PAM role
pub fn human_roles(members: &[String], pam_role_name: &str) -> RoleMap {
    members
        .iter()
        .map(|username| {
            (
                username.clone(),
                PgUser {
                    name: username.clone(),
                    password: None,
                    flags: vec![
                        ROLE_FLAG_LOGIN.to_string(),
                        ROLE_FLAG_SUPERUSER.to_string(),
                    ],
                    member_of: vec![pam_role_name.to_string()],
                    origin: RoleOrigin::Human,
                },
            )
        })
        .collect()
}

/// Merge role maps in order; a later map overwrites an earlier one
pub fn merge_roles(sources: impl IntoIterator<Item = RoleMap>) -> RoleMap {
    let mut merged = RoleMap::new();
    for source in sources {
        for (username, role) in source {
            if let Some(previous) = merged.insert(username.clone(), role) {
                debug!(
                    user = %username,
                    previous = ?previous.origin,
                    "role definition overwritten"
                );
            }
        }
    }
    merged
}

/// The roles of one cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleModel {
    pub roles: RoleMap,
}

impl RoleModel {
    /// Build the role model of a cluster from all four sources
    pub async fn build(
        config: &OperatorConfig,
        infrastructure: &RoleMap,
        spec: &PostgresClusterSpec,
        teams: &dyn TeamsApi,
    ) -> Result<Self> {
        let system = system_roles(config);
        let infrastructure =
            infrastructure_roles(infrastructure).context("could not init infrastructure roles")?;
        let robots =
            robot_roles(spec, config.password_length).context("could not init robot users")?;

        let members = teams
            .team_members(&spec.team_id)
            .await
            .context("could not init human users: could not get list of team members")?;
        let humans = human_roles(&members, &config.pam_role_name);

        let roles = merge_roles([system, infrastructure, robots, humans]);
        debug!(users = ?roles.keys().collect::<Vec<_>>(), "initialized users");
        Ok(Self { roles })
    }

    pub fn get(&self, username: &str) -> Option<&PgUser> {
        self.roles.get(username)
    }

    /// Replace a role's password with one already stored
    pub fn adopt_password(&mut self, username: &str, password: String) {
        if let Some(role) = self.roles.get_mut(username) {
            role.password = Some(password);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PgUser> {
        self.roles.values()
    }
}

/// Parse infrastructure roles from a secret with `userN`/`passwordN`/`inroleN` keys
///
/// Numbering starts at 1 and stops at the first missing `userN`.
pub fn infrastructure_roles_from_secret(secret: &Secret) -> RoleMap {
    let mut roles = RoleMap::new();
    for index in 1.. {
        let Some(name) = secret_value(secret, &format!("user{}", index)) else {
            break;
        };
        let password = secret_value(secret, &format!("password{}", index));
        let member_of = secret_value(secret, &format!("inrole{}", index))
            .into_iter()
            .collect();

        roles.insert(
            name.clone(),
            PgUser {
                name,
                password,
                flags: Vec::new(),
                member_of,
                origin: RoleOrigin::Infrastructure,
            },
        );
    }
    roles
}

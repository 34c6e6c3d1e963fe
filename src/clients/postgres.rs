//! Role creation over a direct connection to the cluster's master

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::{debug, trace};

use super::{DatabaseConnection, DatabaseDriver};
use crate::cluster::NamespacedName;
use crate::cluster::users::PgUser;
use crate::controller::error::{Error, Result};
use crate::resources::common::POSTGRES_PORT;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Quote a PostgreSQL identifier
///
/// - `my_role` -> `"my_role"`
/// - `role"name` -> `"role""name"`
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a SQL string literal by doubling single quotes
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Build the CREATE ROLE statement for a role
pub fn create_role_statement(user: &PgUser) -> String {
    let mut parts = vec![format!("CREATE ROLE {}", quote_identifier(&user.name))];
    parts.extend(user.flags.iter().cloned());

    if let Some(password) = &user.password {
        parts.push(format!(
            "ENCRYPTED PASSWORD '{}'",
            escape_sql_string(password)
        ));
    }

    if !user.member_of.is_empty() {
        let groups = user
            .member_of
            .iter()
            .map(|g| quote_identifier(g))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("IN ROLE {}", groups));
    }

    parts.join(" ")
}

/// tokio-postgres connections to `<cluster>.<namespace>.svc`
pub struct PostgresDriver;

struct PostgresConnection {
    client: tokio_postgres::Client,
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    async fn connect(
        &self,
        cluster: &NamespacedName,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn DatabaseConnection>> {
        let host = format!("{}.{}.svc", cluster.name, cluster.namespace);

        let mut config = tokio_postgres::Config::new();
        config
            .host(&host)
            .port(POSTGRES_PORT as u16)
            .user(username)
            .password(password)
            .dbname("postgres")
            .connect_timeout(CONNECT_TIMEOUT);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| Error::Database(format!("could not connect to {}: {}", host, e)))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                trace!(error = %e, "PostgreSQL connection closed");
            }
        });

        debug!(host = %host, "PostgreSQL connection established");
        Ok(Box::new(PostgresConnection { client }))
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn existing_roles(&self) -> Result<BTreeSet<String>> {
        let rows = self
            .client
            .query("SELECT rolname FROM pg_catalog.pg_roles", &[])
            .await
            .map_err(|e| Error::Database(format!("could not list roles: {}", e)))?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn create_role(&self, user: &PgUser) -> Result<()> {
        self.client
            .batch_execute(&create_role_statement(user))
            .await
            .map_err(|e| {
                Error::Database(format!("could not create role {}: {}", user.name, e))
            })?;
        Ok(())
    }
}

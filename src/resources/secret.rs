use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use rand::Rng;

use crate::cluster::users::PgUser;
use crate::crd::PostgresCluster;
use crate::resources::common::{credentials_secret_name, owner_reference, standard_labels};

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Generate a random alphanumeric password
pub fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate the credentials Secret of one role
///
/// Returns `None` for roles without a password; their authentication
/// happens outside the database.
pub fn generate_user_secret(cluster: &PostgresCluster, user: &PgUser) -> Option<Secret> {
    let password = user.password.as_ref()?;
    let cluster_name = cluster.name_any();

    let data = BTreeMap::from([
        (
            USERNAME_KEY.to_string(),
            ByteString(user.name.as_bytes().to_vec()),
        ),
        (
            PASSWORD_KEY.to_string(),
            ByteString(password.as_bytes().to_vec()),
        ),
    ]);

    Some(Secret {
        metadata: ObjectMeta {
            name: Some(credentials_secret_name(&user.name, &cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Read one key of a secret as UTF-8, from `data` or `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(value.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

//! Unit tests for the role model

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use spilo_operator::Result;
use spilo_operator::clients::{DisabledTeamsApi, TeamsApi};
use spilo_operator::cluster::users::{
    PgUser, RoleMap, RoleModel, RoleOrigin, human_roles, infrastructure_roles,
    infrastructure_roles_from_secret, is_valid_username, merge_roles, normalize_user_flags,
    robot_roles, system_roles,
};

use crate::common::*;

struct StaticTeam(Vec<String>);

#[async_trait]
impl TeamsApi for StaticTeam {
    async fn team_members(&self, _team_id: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn flags(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn role(name: &str, origin: RoleOrigin) -> PgUser {
    PgUser {
        name: name.to_string(),
        password: Some("secret".to_string()),
        flags: flags(&["LOGIN"]),
        member_of: Vec::new(),
        origin,
    }
}

mod flag_tests {
    use super::*;

    #[test]
    fn test_login_is_implied() {
        assert_eq!(
            normalize_user_flags(&flags(&["createdb"])).unwrap(),
            flags(&["CREATEDB", "LOGIN"])
        );
        assert_eq!(normalize_user_flags(&[]).unwrap(), flags(&["LOGIN"]));
    }

    #[test]
    fn test_nologin_suppresses_login() {
        assert_eq!(
            normalize_user_flags(&flags(&["nologin"])).unwrap(),
            flags(&["NOLOGIN"])
        );
    }

    #[test]
    fn test_flags_are_sorted_and_deduplicated() {
        assert_eq!(
            normalize_user_flags(&flags(&["superuser", "CreateDB", "SUPERUSER"])).unwrap(),
            flags(&["CREATEDB", "LOGIN", "SUPERUSER"])
        );
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        assert!(normalize_user_flags(&flags(&["create-db"])).is_err());
        assert!(normalize_user_flags(&flags(&["sudo"])).is_err());
        assert!(normalize_user_flags(&flags(&[""])).is_err());
        assert!(normalize_user_flags(&flags(&["login", "nologin"])).is_err());
        assert!(normalize_user_flags(&flags(&["superuser", "nosuperuser"])).is_err());
    }

    #[test]
    fn test_negated_flags_are_accepted() {
        assert_eq!(
            normalize_user_flags(&flags(&["nocreatedb"])).unwrap(),
            flags(&["LOGIN", "NOCREATEDB"])
        );
    }

    #[test]
    fn test_username_pattern() {
        assert!(is_valid_username("foo"));
        assert!(is_valid_username("Foo42"));
        assert!(!is_valid_username("42foo"));
        assert!(!is_valid_username("foo_bar"));
        assert!(!is_valid_username("foo-bar"));
        assert!(!is_valid_username(""));
    }
}

mod source_tests {
    use super::*;

    #[test]
    fn test_system_roles() {
        let config = test_config();
        let roles = system_roles(&config);

        assert_eq!(roles.len(), 2);
        for name in [&config.super_username, &config.replication_username] {
            let role = &roles[name];
            assert_eq!(role.origin, RoleOrigin::System);
            assert_eq!(
                role.password.as_ref().map(String::len),
                Some(config.password_length)
            );
            assert!(role.flags.is_empty());
        }
    }

    #[test]
    fn test_robot_roles() {
        let cluster = PostgresClusterBuilder::new("acid-test", "default")
            .with_user("app", &["createdb"])
            .with_user("reader", &["nologin"])
            .build();
        let roles = robot_roles(&cluster.spec, 16).unwrap();

        assert_eq!(roles["app"].flags, flags(&["CREATEDB", "LOGIN"]));
        assert_eq!(roles["reader"].flags, flags(&["NOLOGIN"]));
        assert_eq!(roles["app"].origin, RoleOrigin::Robot);
        assert_eq!(roles["app"].password.as_ref().map(String::len), Some(16));
    }

    #[test]
    fn test_robot_roles_reject_bad_names() {
        let cluster = PostgresClusterBuilder::new("acid-test", "default")
            .with_user("foo_bar", &[])
            .build();
        assert!(robot_roles(&cluster.spec, 16).is_err());
    }

    #[test]
    fn test_robot_roles_reject_bad_flags() {
        let cluster = PostgresClusterBuilder::new("acid-test", "default")
            .with_user("app", &["login", "nologin"])
            .build();
        assert!(robot_roles(&cluster.spec, 16).is_err());
    }

    #[test]
    fn test_human_roles() {
        let roles = human_roles(&["jdoe".to_string(), "asmith".to_string()], "zalandos");

        assert_eq!(roles.len(), 2);
        let jdoe = &roles["jdoe"];
        assert_eq!(jdoe.origin, RoleOrigin::Human);
        assert!(jdoe.password.is_none());
        assert!(jdoe.flags.contains(&"SUPERUSER".to_string()));
        assert!(jdoe.flags.contains(&"LOGIN".to_string()));
        assert_eq!(jdoe.member_of, flags(&["zalandos"]));
    }

    #[test]
    fn test_infrastructure_roles_are_normalized() {
        let defined = RoleMap::from([(
            "monitor".to_string(),
            PgUser {
                flags: flags(&["createrole"]),
                ..role("monitor", RoleOrigin::Robot)
            },
        )]);
        let roles = infrastructure_roles(&defined).unwrap();

        let monitor = &roles["monitor"];
        assert_eq!(monitor.origin, RoleOrigin::Infrastructure);
        assert_eq!(monitor.flags, flags(&["CREATEROLE", "LOGIN"]));
        assert_eq!(monitor.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_infrastructure_roles_from_secret() {
        let data = [
            ("user1", "monitor"),
            ("password1", "pw1"),
            ("inrole1", "admin"),
            ("user2", "backup"),
            ("password2", "pw2"),
            ("user4", "unreachable"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect::<BTreeMap<_, _>>();
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };

        let roles = infrastructure_roles_from_secret(&secret);
        assert_eq!(roles.len(), 2);
        assert_eq!(roles["monitor"].password.as_deref(), Some("pw1"));
        assert_eq!(roles["monitor"].member_of, flags(&["admin"]));
        assert!(roles["backup"].member_of.is_empty());
        assert!(!roles.contains_key("unreachable"));
    }
}

mod merge_tests {
    use super::*;

    #[test]
    fn test_later_source_overwrites() {
        let merged = merge_roles([
            RoleMap::from([("app".to_string(), role("app", RoleOrigin::Infrastructure))]),
            RoleMap::from([("app".to_string(), role("app", RoleOrigin::Robot))]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["app"].origin, RoleOrigin::Robot);
    }

    #[tokio::test]
    async fn test_build_merges_all_sources() {
        let config = test_config();
        let cluster = PostgresClusterBuilder::new("acid-test", "default")
            .with_user("app", &["createdb"])
            .build();
        let infrastructure = RoleMap::from([(
            "monitor".to_string(),
            role("monitor", RoleOrigin::Infrastructure),
        )]);
        let team = StaticTeam(vec!["jdoe".to_string()]);

        let model = RoleModel::build(&config, &infrastructure, &cluster.spec, &team)
            .await
            .unwrap();

        assert_eq!(model.iter().count(), 5);
        assert_eq!(
            model.get(&config.super_username).unwrap().origin,
            RoleOrigin::System
        );
        assert_eq!(
            model.get("monitor").unwrap().origin,
            RoleOrigin::Infrastructure
        );
        assert_eq!(model.get("app").unwrap().origin, RoleOrigin::Robot);
        assert_eq!(model.get("jdoe").unwrap().origin, RoleOrigin::Human);
    }

    #[tokio::test]
    async fn test_build_without_team_directory() {
        let config = test_config();
        let cluster = create_test_cluster("acid-test", "default", 1);

        let model = RoleModel::build(&config, &RoleMap::new(), &cluster.spec, &DisabledTeamsApi)
            .await
            .unwrap();
        assert_eq!(model.iter().count(), 2);
        assert!(model.iter().all(|r| r.origin == RoleOrigin::System));
    }

    #[tokio::test]
    async fn test_adopt_password() {
        let config = test_config();
        let cluster = create_test_cluster("acid-test", "default", 1);
        let mut model =
            RoleModel::build(&config, &RoleMap::new(), &cluster.spec, &DisabledTeamsApi)
                .await
                .unwrap();

        model.adopt_password(&config.super_username, "stored".to_string());
        assert_eq!(
            model.get(&config.super_username).unwrap().password.as_deref(),
            Some("stored")
        );

        model.adopt_password("nobody", "stored".to_string());
        assert!(model.get("nobody").is_none());
    }
}

//! Unit tests for spec validation

use crate::common::*;
use spilo_operator::Error;
use spilo_operator::controller::validation::validate_spec;

fn error_message(builder: PostgresClusterBuilder) -> String {
    match validate_spec(&builder.build().spec) {
        Err(Error::ValidationError(message)) => message,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_valid_specs() {
    assert!(validate_spec(&create_test_cluster("acid-test", "default", 3).spec).is_ok());

    let cluster = PostgresClusterBuilder::new("acid-test", "default")
        .with_instances(0)
        .with_resources(("500m", "2Gi"), Some(("2", "4Gi")))
        .with_user("app", &["createdb"])
        .build();
    assert!(validate_spec(&cluster.spec).is_ok());
}

#[test]
fn test_negative_instances() {
    let message = error_message(PostgresClusterBuilder::new("acid-test", "default").with_instances(-1));
    assert!(message.contains("-1"));
}

#[test]
fn test_volume_size() {
    let unparsable = error_message(
        PostgresClusterBuilder::new("acid-test", "default").with_volume("ten gigs", None),
    );
    assert!(unparsable.contains("ten gigs"));

    let zero =
        error_message(PostgresClusterBuilder::new("acid-test", "default").with_volume("0Gi", None));
    assert!(zero.contains("positive"));

    let huge =
        error_message(PostgresClusterBuilder::new("acid-test", "default").with_volume("1e28", None));
    assert!(huge.contains("too large"));
}

#[test]
fn test_resource_quantities() {
    let message = error_message(
        PostgresClusterBuilder::new("acid-test", "default")
            .with_resources(("100m", "1Gi"), Some(("two", "4Gi"))),
    );
    assert_eq!(message, "invalid cpu limits: 'two'");
}

#[test]
fn test_validation_errors_are_not_retried() {
    let err = validate_spec(
        &PostgresClusterBuilder::new("acid-test", "default")
            .with_instances(-3)
            .build()
            .spec,
    )
    .unwrap_err();
    assert!(!err.is_retryable());
}

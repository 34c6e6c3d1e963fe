//! Service and endpoint generation
//!
//! The service has no selector: Patroni keeps the endpoint of the same
//! name pointed at the current master, so the operator only creates an
//! empty endpoint and lets Patroni fill in its addresses.

use k8s_openapi::api::core::v1::{Endpoints, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::PostgresCluster;
use crate::resources::common::{POSTGRES_PORT, owner_reference, standard_labels};

/// Generate the cluster service
///
/// Becomes a LoadBalancer restricted to the allowed source ranges when
/// any are set, a ClusterIP service otherwise.
pub fn generate_service(cluster: &PostgresCluster, allowed_source_ranges: &[String]) -> Service {
    let cluster_name = cluster.name_any();

    let (service_type, source_ranges) = if allowed_source_ranges.is_empty() {
        ("ClusterIP", None)
    } else {
        ("LoadBalancer", Some(allowed_source_ranges.to_vec()))
    };

    Service {
        metadata: ObjectMeta {
            name: Some(cluster_name.clone()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("postgresql".to_string()),
                port: POSTGRES_PORT,
                target_port: Some(IntOrString::Int(POSTGRES_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some(service_type.to_string()),
            load_balancer_source_ranges: source_ranges,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the empty endpoint backing the cluster service
pub fn generate_endpoint(cluster: &PostgresCluster) -> Endpoints {
    let cluster_name = cluster.name_any();

    Endpoints {
        metadata: ObjectMeta {
            name: Some(cluster_name.clone()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        subsets: None,
    }
}

//! Validation of a cluster spec before it reaches the lifecycle driver

use crate::controller::error::{Error, Result};
use crate::crd::{PostgresClusterSpec, ResourceList};
use crate::resources::quantity::ParsedQuantity;

/// Validate the cluster spec
pub fn validate_spec(spec: &PostgresClusterSpec) -> Result<()> {
    validate_instances(spec)?;
    validate_volume(spec)?;
    validate_resources(spec)?;
    Ok(())
}

fn validate_instances(spec: &PostgresClusterSpec) -> Result<()> {
    if spec.number_of_instances < 0 {
        return Err(Error::ValidationError(format!(
            "number of instances {} is negative",
            spec.number_of_instances
        )));
    }
    Ok(())
}

fn validate_volume(spec: &PostgresClusterSpec) -> Result<()> {
    let size = ParsedQuantity::parse(&spec.volume.size).map_err(|_| {
        Error::ValidationError(format!("could not parse volume size '{}'", spec.volume.size))
    })?;
    if size <= ParsedQuantity::ZERO {
        return Err(Error::ValidationError(format!(
            "volume size '{}' must be positive",
            spec.volume.size
        )));
    }
    if size.as_gib().is_err() {
        return Err(Error::ValidationError(format!(
            "volume size '{}' is too large",
            spec.volume.size
        )));
    }
    Ok(())
}

fn validate_resources(spec: &PostgresClusterSpec) -> Result<()> {
    let Some(resources) = &spec.resources else {
        return Ok(());
    };
    for (kind, list) in [("requests", &resources.requests), ("limits", &resources.limits)] {
        if let Some(list) = list {
            validate_resource_list(kind, list)?;
        }
    }
    Ok(())
}

fn validate_resource_list(kind: &str, list: &ResourceList) -> Result<()> {
    for (resource, value) in [("cpu", &list.cpu), ("memory", &list.memory)] {
        if let Some(value) = value {
            ParsedQuantity::parse(value).map_err(|_| {
                Error::ValidationError(format!("invalid {} {}: '{}'", resource, kind, value))
            })?;
        }
    }
    Ok(())
}

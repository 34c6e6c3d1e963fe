//! Unit tests for the Spilo operator
//!
//! This module contains unit tests for:
//! - Resource generators (StatefulSet, Service, Endpoint, Secret)
//! - Live vs desired comparison
//! - Role model construction
//! - Quantity arithmetic and spec validation
//! - Status transitions
//! - Volume helpers

#[path = "../common/mod.rs"]
mod common;

mod compare;
mod quantity;
mod state_machine;
mod users;
mod validation;
mod volumes;

//! vdb-operator: Kubernetes operator for virtual databases
//!
//! This crate provides the `VirtualDatabase` custom resource and the
//! controller that builds each one into a service image, deploys it and keeps
//! the deployment in step with the spec and the configuration it references.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};

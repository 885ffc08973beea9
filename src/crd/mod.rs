//! Custom Resource Definitions for the VDB operator
//!
//! This module defines the `VirtualDatabase` CRD and the types it is built from.

pub mod types;
mod virtual_database;


pub use types::*;
pub use virtual_database::{
    SpecValidationError, VirtualDatabase, VirtualDatabaseSpec, VirtualDatabaseStatus,
};

//! Response bodies for the REST API

use serde::Serialize;

use crate::crd::{Phase, VirtualDatabaseStatus};

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub leader: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VdbSummary {
    pub name: String,
    pub namespace: String,
    pub phase: Phase,
    pub version: String,
    pub route: String,
    pub replicas: i32,
    pub ready_replicas: i32,
}

#[derive(Serialize, Debug)]
pub struct VdbListResponse {
    pub items: Vec<VdbSummary>,
    pub total: usize,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VdbDetailResponse {
    pub name: String,
    pub namespace: String,
    pub status: VirtualDatabaseStatus,
    pub created_at: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

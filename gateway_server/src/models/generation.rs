//! generations.json: one record per generation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    pub site: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_used: Option<String>,
}

/// Request-specific details attached to a generation record.
#[derive(Debug, Clone, Default)]
pub struct GenerationDetails {
    pub environment: Option<String>,
    pub style: Option<String>,
    pub error: Option<String>,
    pub ip_address: Option<String>,
    pub workflow_used: Option<String>,
}

//! unified_users.json: one record per user, shared across sites.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into the users document envelope.
pub const USERS_DOCUMENT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub last_free_trial_date: Option<String>,
    #[serde(default)]
    pub first_visit_date: String,
    #[serde(default)]
    pub last_visit_date: String,
    #[serde(default)]
    pub total_generations: u64,
    #[serde(default)]
    pub total_free_trials_used: u64,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub sites_used: Vec<String>,
    #[serde(default)]
    pub last_sync_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Keys written by other sites that this gateway does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    pub fn uses_site(&self, site: &str) -> bool {
        self.sites_used.iter().any(|s| s == site)
    }

    /// Stamp the sync date after a mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_sync_date = now.to_rfc3339();
    }
}

pub type UserMap = BTreeMap<String, UserRecord>;

/// Envelope the users file is written with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersDocument {
    pub version: String,
    pub last_updated: String,
    pub users: UserMap,
}

impl UsersDocument {
    pub fn new(users: UserMap, now: DateTime<Utc>) -> Self {
        Self {
            version: USERS_DOCUMENT_VERSION.to_string(),
            last_updated: now.to_rfc3339(),
            users,
        }
    }
}

/// Accepted on-disk shapes: the envelope, or a bare `{ id: user }` map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StoredUsers {
    Envelope(UsersDocument),
    Bare(UserMap),
}

impl StoredUsers {
    pub fn into_users(self) -> UserMap {
        match self {
            StoredUsers::Envelope(doc) => doc.users,
            StoredUsers::Bare(map) => map,
        }
    }
}

//! Flat JSON file persistence.
//!
//! Every read loads a whole file and every write replaces it. A file that is
//! missing or fails to parse reads as the caller's default, so a fresh data
//! directory behaves like an empty one.
//!
//! Generation and event files are shared with the site front-ends and the peer
//! site, so appends and pruning work on the raw JSON records. A record this
//! gateway cannot decode is skipped on read and written back untouched.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::StoreError;
use crate::models::event::UserEvent;
use crate::models::generation::GenerationRecord;
use crate::models::user::{StoredUsers, UserMap, UsersDocument};

pub const USERS_FILE: &str = "unified_users.json";
pub const GENERATIONS_FILE: &str = "generations.json";
pub const EVENTS_FILE: &str = "events.json";

/// Locations of the data files this gateway reads and writes.
#[derive(Clone, Debug)]
pub struct DataStore {
    local_dir: PathBuf,
    shared_dir: Option<PathBuf>,
    peer_dir: Option<PathBuf>,
}

impl DataStore {
    pub fn new(local_dir: PathBuf, shared_dir: Option<PathBuf>, peer_dir: Option<PathBuf>) -> Self {
        Self {
            local_dir,
            shared_dir,
            peer_dir,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.data_dir.clone(),
            config.shared_data_dir.clone(),
            config.peer_data_dir.clone(),
        )
    }

    /// The shared directory when it exists, otherwise the local one.
    pub async fn data_dir(&self) -> PathBuf {
        if let Some(shared) = &self.shared_dir {
            if tokio::fs::try_exists(shared).await.unwrap_or(false) {
                return shared.clone();
            }
        }
        self.local_dir.clone()
    }

    async fn ensure_data_dir(&self) -> Result<PathBuf, StoreError> {
        let dir = self.data_dir().await;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    pub async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        let path = self.ensure_data_dir().await?.join(file);
        let body = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    pub async fn load_users(&self) -> UserMap {
        let path = self.data_dir().await.join(USERS_FILE);
        match read_file_or::<StoredUsers>(&path).await {
            Some(stored) => stored.into_users(),
            None => {
                tracing::debug!(path = %path.display(), "No users database yet, starting empty");
                UserMap::new()
            }
        }
    }

    pub async fn save_users(&self, users: UserMap) -> Result<(), StoreError> {
        let count = users.len();
        self.write_json(USERS_FILE, &UsersDocument::new(users, Utc::now()))
            .await?;
        tracing::debug!(users = count, "Users database written");
        Ok(())
    }

    pub async fn load_generations(&self) -> Vec<GenerationRecord> {
        self.load_records(GENERATIONS_FILE).await
    }

    /// Replace the local generations file.
    pub async fn save_generations(&self, records: &[GenerationRecord]) -> Result<(), StoreError> {
        self.write_json(GENERATIONS_FILE, &records).await
    }

    pub async fn load_peer_generations(&self) -> Vec<GenerationRecord> {
        self.load_peer_records(GENERATIONS_FILE).await
    }

    pub async fn load_events(&self) -> Vec<UserEvent> {
        self.load_records(EVENTS_FILE).await
    }

    /// Replace the local events file.
    pub async fn save_events(&self, events: &[UserEvent]) -> Result<(), StoreError> {
        self.write_json(EVENTS_FILE, &events).await
    }

    pub async fn load_peer_events(&self) -> Vec<UserEvent> {
        self.load_peer_records(EVENTS_FILE).await
    }

    /// Append one record to a record list file, keeping every existing entry as stored.
    pub async fn append_record<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StoreError> {
        let path = self.data_dir().await.join(file);
        let mut records = read_raw_records(&path).await?;
        let value = serde_json::to_value(record).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        records.push(value);
        self.write_json(file, &records).await
    }

    /// Drop the raw records `keep` rejects and return how many went.
    pub async fn retain_records<F>(&self, file: &str, keep: F) -> Result<usize, StoreError>
    where
        F: Fn(&Value) -> bool,
    {
        let path = self.data_dir().await.join(file);
        let mut records = read_raw_records(&path).await?;
        let before = records.len();
        records.retain(|r| keep(r));
        let removed = before - records.len();
        if removed > 0 {
            self.write_json(file, &records).await?;
        }
        Ok(removed)
    }

    async fn load_records<T: DeserializeOwned>(&self, file: &str) -> Vec<T> {
        let path = self.data_dir().await.join(file);
        decode_records(&path, &records_or_empty(&path).await)
    }

    async fn load_peer_records<T: DeserializeOwned>(&self, file: &str) -> Vec<T> {
        let Some(dir) = &self.peer_dir else {
            return Vec::new();
        };
        let path = dir.join(file);
        decode_records(&path, &records_or_empty(&path).await)
    }
}

/// Raw entries of a record list file. Missing or unparsable files are empty;
/// valid JSON of another shape is an error so nobody writes over it.
async fn read_raw_records(path: &Path) -> Result<Vec<Value>, StoreError> {
    match read_file_or::<Value>(path).await {
        None => Ok(Vec::new()),
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(StoreError::NotAList {
            path: path.to_path_buf(),
        }),
    }
}

async fn records_or_empty(path: &Path) -> Vec<Value> {
    read_raw_records(path).await.unwrap_or_else(|e| {
        tracing::warn!("{e}");
        Vec::new()
    })
}

fn decode_records<T: DeserializeOwned>(path: &Path, raw: &[Value]) -> Vec<T> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(path = %path.display(), index, "Skipping undecodable record: {e}");
                None
            }
        })
        .collect()
}

async fn read_file_or<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring unparsable data file: {e}");
            None
        }
    }
}

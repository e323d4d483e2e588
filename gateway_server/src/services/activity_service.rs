//! Generation records and user events, including the peer site's files.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::models::event::UserEvent;
use crate::models::generation::{GenerationDetails, GenerationRecord};
use crate::services::data_store::{DataStore, EVENTS_FILE, GENERATIONS_FILE};

/// Append a generation record to the local generations file.
pub async fn record_generation(
    store: &DataStore,
    user_id: &str,
    device_id: &str,
    site: &str,
    success: bool,
    details: GenerationDetails,
) -> Result<GenerationRecord, StoreError> {
    let record = GenerationRecord {
        id: format!("gen_{}", uuid::Uuid::new_v4().simple()),
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        site: site.to_string(),
        success,
        timestamp: Utc::now(),
        environment: details.environment,
        style: details.style,
        pose: None,
        gender: None,
        error: details.error,
        ip_address: details.ip_address,
        workflow_used: details.workflow_used,
    };

    store.append_record(GENERATIONS_FILE, &record).await?;

    tracing::debug!(id = %record.id, user_id, success, "Generation recorded");
    Ok(record)
}

/// Append a user event to the local events file.
pub async fn log_user_event(
    store: &DataStore,
    user_id: &str,
    device_id: &str,
    action: &str,
    site: &str,
    metadata: Map<String, Value>,
) -> Result<UserEvent, StoreError> {
    let ip_address = metadata
        .get("ipAddress")
        .and_then(Value::as_str)
        .map(str::to_string);

    let event = UserEvent {
        id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        action: action.to_string(),
        timestamp: Utc::now(),
        metadata: (!metadata.is_empty()).then_some(metadata),
        ip_address,
        site: site.to_string(),
    };

    store.append_record(EVENTS_FILE, &event).await?;

    tracing::debug!(id = %event.id, user_id, action, "User event logged");
    Ok(event)
}

/// Local and peer generations, newest first.
pub async fn list_generations(store: &DataStore) -> Vec<GenerationRecord> {
    let mut all = store.load_generations().await;
    all.extend(store.load_peer_generations().await);
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all
}

/// Local and peer events, newest first.
pub async fn list_events(store: &DataStore) -> Vec<UserEvent> {
    let mut all = store.load_events().await;
    all.extend(store.load_peer_events().await);
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all
}

pub fn generations_for_site(records: Vec<GenerationRecord>, site: &str) -> Vec<GenerationRecord> {
    records.into_iter().filter(|g| g.site == site).collect()
}

pub fn events_for_site(events: Vec<UserEvent>, site: &str) -> Vec<UserEvent> {
    events.into_iter().filter(|e| e.site == site).collect()
}

/// The `limit` newest generations of one user on one site.
pub fn recent_generations_for_user(
    records: &[GenerationRecord],
    user_id: &str,
    site: &str,
    limit: usize,
) -> Vec<GenerationRecord> {
    records
        .iter()
        .filter(|g| g.user_id == user_id && g.site == site)
        .take(limit)
        .cloned()
        .collect()
}

/// The `limit` newest events of one user on one site.
pub fn recent_events_for_user(
    events: &[UserEvent],
    user_id: &str,
    site: &str,
    limit: usize,
) -> Vec<UserEvent> {
    events
        .iter()
        .filter(|e| e.user_id == user_id && e.site == site)
        .take(limit)
        .cloned()
        .collect()
}

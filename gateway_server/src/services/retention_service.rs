//! Pruning of old generation and event records.

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::services::data_store::{DataStore, EVENTS_FILE, GENERATIONS_FILE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub generations_removed: usize,
    pub events_removed: usize,
}

/// Drop local generations and events older than one calendar month.
pub async fn clean_old_data(store: &DataStore) -> Result<CleanupResult, StoreError> {
    clean_before(store, one_month_ago(Utc::now())).await
}

fn one_month_ago(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(1)).unwrap_or(now)
}

/// Records without a readable timestamp cannot be aged and are kept.
fn is_recent(record: &Value, cutoff: DateTime<Utc>) -> bool {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .is_none_or(|ts| ts.with_timezone(&Utc) > cutoff)
}

async fn clean_before(store: &DataStore, cutoff: DateTime<Utc>) -> Result<CleanupResult, StoreError> {
    let generations_removed = store
        .retain_records(GENERATIONS_FILE, |r| is_recent(r, cutoff))
        .await?;
    let events_removed = store
        .retain_records(EVENTS_FILE, |r| is_recent(r, cutoff))
        .await?;

    tracing::info!(generations_removed, events_removed, %cutoff, "Old data cleaned");
    Ok(CleanupResult {
        generations_removed,
        events_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::UserEvent;
    use crate::models::generation::GenerationRecord;
    use chrono::{Duration, TimeZone};

    #[test]
    fn one_month_is_calendar_month() {
        let now = Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap();
        // chrono clamps to the last day of the shorter month
        assert_eq!(
            one_month_ago(now),
            Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn removes_only_records_older_than_a_month() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path().to_path_buf(), None, None);
        let now = Utc::now();

        let generation = |id: &str, age: Duration| GenerationRecord {
            id: id.into(),
            user_id: "u1".into(),
            device_id: "d1".into(),
            site: "deeplab".into(),
            success: true,
            timestamp: now - age,
            environment: None,
            style: None,
            pose: None,
            gender: None,
            error: None,
            ip_address: None,
            workflow_used: None,
        };
        store
            .save_generations(&[
                generation("old", Duration::days(45)),
                generation("fresh", Duration::days(2)),
            ])
            .await
            .unwrap();
        store
            .save_events(&[UserEvent {
                id: "e1".into(),
                user_id: "u1".into(),
                device_id: "d1".into(),
                action: "visit".into(),
                timestamp: now - Duration::days(60),
                metadata: None,
                ip_address: None,
                site: "deeplab".into(),
            }])
            .await
            .unwrap();

        let result = clean_old_data(&store).await.unwrap();
        assert_eq!(
            result,
            CleanupResult {
                generations_removed: 1,
                events_removed: 1
            }
        );
        let left = store.load_generations().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "fresh");
        assert!(store.load_events().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_records_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let old = (Utc::now() - Duration::days(90)).to_rfc3339();
        let recent = (Utc::now() - Duration::days(1)).to_rfc3339();
        std::fs::write(
            dir.path().join(EVENTS_FILE),
            serde_json::to_vec(&serde_json::json!([
                { "id": "old", "timestamp": old },
                { "id": "recent", "note": "written by the site", "timestamp": recent },
                { "id": "undated" }
            ]))
            .unwrap(),
        )
        .unwrap();
        let store = DataStore::new(dir.path().to_path_buf(), None, None);

        let result = clean_old_data(&store).await.unwrap();
        assert_eq!(result.events_removed, 1);
        assert_eq!(result.generations_removed, 0);

        let raw: Vec<Value> =
            serde_json::from_slice(&std::fs::read(dir.path().join(EVENTS_FILE)).unwrap()).unwrap();
        let ids: Vec<_> = raw.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec!["recent", "undated"]);
        assert_eq!(raw[0]["note"], "written by the site");
    }
}

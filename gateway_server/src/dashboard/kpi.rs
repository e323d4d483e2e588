//! KPI aggregates for the admin dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::generation::GenerationRecord;
use crate::models::user::UserMap;
use crate::services::activity_service;
use crate::services::data_store::DataStore;

/// Usage totals for one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStats {
    pub total_users: usize,
    pub total_generations: usize,
    pub total_successful_generations: usize,
    pub total_failed_generations: usize,
    pub total_credits_used: u64,
    pub last_updated: DateTime<Utc>,
}

pub async fn query_site_stats(store: &DataStore, site: &str) -> SiteStats {
    let users = store.load_users().await;
    let generations = activity_service::list_generations(store).await;
    compute_site_stats(&users, &generations, site, Utc::now())
}

pub fn compute_site_stats(
    users: &UserMap,
    generations: &[GenerationRecord],
    site: &str,
    now: DateTime<Utc>,
) -> SiteStats {
    let site_users: Vec<_> = users.values().filter(|u| u.uses_site(site)).collect();
    let site_generations: Vec<_> = generations.iter().filter(|g| g.site == site).collect();
    let successful = site_generations.iter().filter(|g| g.success).count();

    SiteStats {
        total_users: site_users.len(),
        total_generations: site_generations.len(),
        total_successful_generations: successful,
        total_failed_generations: site_generations.len() - successful,
        total_credits_used: site_users.iter().map(|u| u.total_generations).sum(),
        last_updated: now,
    }
}

//! User lookups and credit/blocking mutations on the unified users file.

use chrono::Utc;

use crate::error::StoreError;
use crate::models::user::{UserMap, UserRecord};
use crate::services::data_store::DataStore;

pub async fn list_users(store: &DataStore) -> UserMap {
    store.load_users().await
}

pub async fn get_user(store: &DataStore, user_id: &str) -> Option<UserRecord> {
    store.load_users().await.remove(user_id)
}

/// Read the users file, apply `f` to one user, stamp it and write the file back.
///
/// Returns `None` when the user does not exist; nothing is written then.
async fn mutate_user<T>(
    store: &DataStore,
    user_id: &str,
    f: impl FnOnce(&mut UserRecord) -> T,
) -> Result<Option<T>, StoreError> {
    let mut users = store.load_users().await;
    let Some(user) = users.get_mut(user_id) else {
        tracing::warn!(user_id, "User not found");
        return Ok(None);
    };

    let out = f(user);
    user.touch(Utc::now());
    store.save_users(users).await?;
    Ok(Some(out))
}

/// Set a user's credits to an absolute value.
pub async fn set_credits(store: &DataStore, user_id: &str, credits: i64) -> Result<bool, StoreError> {
    let found = mutate_user(store, user_id, |u| u.credits = credits).await?;
    if found.is_some() {
        crate::metrics::credits_changed("set");
        tracing::info!(user_id, credits, "Credits set");
    }
    Ok(found.is_some())
}

/// Add `amount` credits to a user, saturating at the integer bounds.
pub async fn add_credits(store: &DataStore, user_id: &str, amount: i64) -> Result<bool, StoreError> {
    let total = mutate_user(store, user_id, |u| {
        u.credits = u.credits.saturating_add(amount);
        u.credits
    })
    .await?;
    if let Some(total) = total {
        crate::metrics::credits_changed("add");
        tracing::info!(user_id, amount, total, "Credits added");
    }
    Ok(total.is_some())
}

pub async fn set_blocked(store: &DataStore, user_id: &str, blocked: bool) -> Result<bool, StoreError> {
    let found = mutate_user(store, user_id, |u| u.is_blocked = blocked).await?;
    if found.is_some() {
        tracing::info!(user_id, blocked, "User block status changed");
    }
    Ok(found.is_some())
}

/// Charge one credit for a completed generation on `site`.
///
/// Credits never go below zero. Returns the remaining balance, or `None`
/// when the user vanished from the file since the request started.
pub async fn consume_credit(
    store: &DataStore,
    user_id: &str,
    site: &str,
) -> Result<Option<i64>, StoreError> {
    let now = Utc::now();
    let remaining = mutate_user(store, user_id, |u| {
        u.credits = u.credits.saturating_sub(1).max(0);
        u.total_generations += 1;
        if !u.uses_site(site) {
            u.sites_used.push(site.to_string());
        }
        u.last_visit_date = now.to_rfc3339();
        u.credits
    })
    .await?;
    if remaining.is_some() {
        crate::metrics::credits_changed("consume");
    }
    Ok(remaining)
}

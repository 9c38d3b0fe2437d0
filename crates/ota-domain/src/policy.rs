//! Reaper selection policies: which stored updates may be deleted after a launch.

use serde_json::Value;
use tracing::debug;

use crate::metadata::ManifestFilters;
use crate::update::Update;

/// Decides which updates the reaper removes.
///
/// Implementations must never return the launched update.
pub trait ReaperSelectionPolicy: Send + Sync {
    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        filters: Option<&ManifestFilters>,
    ) -> Vec<Update>;
}

/// Whether an update's manifest metadata satisfies the server filters.
///
/// Only filter keys present in the metadata are compared; an update without
/// metadata matches every filter set.
#[must_use]
pub fn manifest_matches_filters(update: &Update, filters: Option<&ManifestFilters>) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    let Some(metadata) = update.manifest_metadata() else {
        return true;
    };
    filters.0.iter().all(|(key, expected)| match metadata.get(key) {
        None => true,
        Some(actual) => filter_value_matches(actual, expected),
    })
}

fn filter_value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::String(a), other) | (other, Value::String(a)) => *a == other.to_string(),
        (a, b) => a == b,
    }
}

/// Keeps the launched update and the newest older update of the same scope,
/// preferring one that matches the manifest filters so there is always a
/// fallback to roll back to. Everything older in that scope is deleted.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterAwarePolicy;

impl ReaperSelectionPolicy for FilterAwarePolicy {
    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        filters: Option<&ManifestFilters>,
    ) -> Vec<Update> {
        let mut candidates: Vec<&Update> = Vec::new();
        let mut next_newest: Option<&Update> = None;
        let mut next_newest_matching: Option<&Update> = None;

        for update in updates {
            if update.scope_key != launched.scope_key || update.id == launched.id {
                continue;
            }
            if update.commit_time >= launched.commit_time {
                continue;
            }
            candidates.push(update);
            if next_newest.is_none_or(|newest| newest.commit_time < update.commit_time) {
                next_newest = Some(update);
            }
            if manifest_matches_filters(update, filters)
                && next_newest_matching
                    .is_none_or(|newest| newest.commit_time < update.commit_time)
            {
                next_newest_matching = Some(update);
            }
        }

        let survivor = next_newest_matching.or(next_newest).map(|update| update.id);
        let selected: Vec<Update> = candidates
            .into_iter()
            .filter(|update| Some(update.id) != survivor)
            .cloned()
            .collect();
        debug!(
            launched = %launched.id,
            selected = selected.len(),
            "filter-aware policy selected updates"
        );
        selected
    }
}

/// Keeps at most `max_updates_to_keep` updates, deleting the least recently
/// accessed first. The launched update always survives.
#[derive(Clone, Copy, Debug)]
pub struct DevelopmentClientPolicy {
    max_updates_to_keep: usize,
}

impl DevelopmentClientPolicy {
    /// `max_updates_to_keep` is clamped to at least one, the launched update.
    #[must_use]
    pub fn new(max_updates_to_keep: usize) -> Self {
        Self {
            max_updates_to_keep: max_updates_to_keep.max(1),
        }
    }

    #[must_use]
    pub fn max_updates_to_keep(&self) -> usize {
        self.max_updates_to_keep
    }
}

impl Default for DevelopmentClientPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ReaperSelectionPolicy for DevelopmentClientPolicy {
    fn updates_to_delete(
        &self,
        launched: &Update,
        updates: &[Update],
        _filters: Option<&ManifestFilters>,
    ) -> Vec<Update> {
        let excess = updates.len().saturating_sub(self.max_updates_to_keep);
        if excess == 0 {
            return Vec::new();
        }
        let mut by_access: Vec<&Update> = updates
            .iter()
            .filter(|update| update.id != launched.id)
            .collect();
        by_access.sort_by_key(|update| (update.last_accessed, update.commit_time));
        by_access.into_iter().take(excess).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn update(n: u128, scope: &str, age_minutes: i64, manifest: Value) -> Update {
        let base = OffsetDateTime::UNIX_EPOCH + Duration::days(19_000);
        let mut update = Update::new(
            Uuid::from_u128(n),
            scope,
            base - Duration::minutes(age_minutes),
            "1",
            manifest.to_string(),
        );
        update.last_accessed = base - Duration::minutes(age_minutes);
        update
    }

    fn filters(pairs: Value) -> ManifestFilters {
        match pairs {
            Value::Object(map) => ManifestFilters(map),
            _ => ManifestFilters(Map::new()),
        }
    }

    fn ids(updates: &[Update]) -> Vec<u128> {
        let mut ids: Vec<u128> = updates.iter().map(|u| u.id.as_u128()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn keeps_launched_and_next_newest() {
        let launched = update(1, "s", 0, json!({}));
        let all = vec![
            launched.clone(),
            update(2, "s", 10, json!({})),
            update(3, "s", 20, json!({})),
            update(4, "s", 30, json!({})),
        ];
        let selected = FilterAwarePolicy.updates_to_delete(&launched, &all, None);
        assert_eq!(ids(&selected), vec![3, 4]);
    }

    #[test]
    fn prefers_a_fallback_that_matches_filters() {
        let launched = update(1, "s", 0, json!({"metadata": {"branchname": "main"}}));
        let all = vec![
            launched.clone(),
            update(2, "s", 10, json!({"metadata": {"branchname": "other"}})),
            update(3, "s", 20, json!({"metadata": {"branchname": "main"}})),
        ];
        let filters = filters(json!({"branchname": "main"}));
        let selected = FilterAwarePolicy.updates_to_delete(&launched, &all, Some(&filters));
        assert_eq!(ids(&selected), vec![2]);
    }

    #[test]
    fn ignores_other_scopes_and_newer_updates() {
        let launched = update(1, "s", 10, json!({}));
        let all = vec![
            launched.clone(),
            update(2, "s", 0, json!({})),
            update(3, "other", 40, json!({})),
            update(4, "s", 20, json!({})),
            update(5, "s", 30, json!({})),
        ];
        let selected = FilterAwarePolicy.updates_to_delete(&launched, &all, None);
        assert_eq!(ids(&selected), vec![5]);
    }

    #[test]
    fn updates_without_metadata_match_any_filter() {
        let bare = update(1, "s", 0, json!({}));
        let filters = filters(json!({"branchname": "main"}));
        assert!(manifest_matches_filters(&bare, Some(&filters)));

        let numeric = update(2, "s", 0, json!({"metadata": {"rollout": 5}}));
        let numeric_filter = ManifestFilters(
            [("rollout".to_string(), json!("5"))].into_iter().collect(),
        );
        assert!(manifest_matches_filters(&numeric, Some(&numeric_filter)));
    }

    #[test]
    fn development_policy_trims_least_recently_accessed() {
        let launched = update(1, "s", 50, json!({}));
        let all = vec![
            launched.clone(),
            update(2, "s", 10, json!({})),
            update(3, "s", 20, json!({})),
            update(4, "s", 30, json!({})),
        ];
        let policy = DevelopmentClientPolicy::new(2);
        let selected = policy.updates_to_delete(&launched, &all, None);
        assert_eq!(ids(&selected), vec![3, 4], "launched is oldest but kept");

        let roomy = DevelopmentClientPolicy::new(10);
        assert!(roomy.updates_to_delete(&launched, &all, None).is_empty());
        assert_eq!(DevelopmentClientPolicy::new(0).max_updates_to_keep(), 1);
    }
}

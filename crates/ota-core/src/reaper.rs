//! Removes updates and asset files the launcher no longer needs.

use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use ota_domain::{ReaperSelectionPolicy, Update, UpdatesConfig};

use crate::error::Result;
use crate::files::remove_asset_file;
use crate::store::UpdatesStore;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReapSummary {
    pub deleted_updates: Vec<Uuid>,
    pub deleted_assets: usize,
    pub deleted_files: usize,
    /// Files whose rows were swept but which could not be unlinked.
    pub failed_files: Vec<String>,
}

/// Runs one reaping pass after `launched` has been started.
///
/// The launched update is pinned first, then `policy` picks which stored
/// updates to drop. Unreferenced asset rows are swept in one transaction and
/// their files are deleted afterwards; a file that cannot be removed is
/// reported but does not undo the committed sweep.
pub fn reap_unused_updates(
    store: &UpdatesStore,
    config: &UpdatesConfig,
    policy: &dyn ReaperSelectionPolicy,
    launched: &Update,
) -> Result<ReapSummary> {
    let launched = store.mark_update_finished(launched.id)?;
    let updates = store.all_updates()?;
    let filters = store.manifest_filters(&config.scope_key)?;

    let doomed: Vec<Uuid> = policy
        .updates_to_delete(&launched, &updates, filters.as_ref())
        .into_iter()
        .map(|update| update.id)
        .filter(|id| *id != launched.id)
        .collect();
    let mut summary = ReapSummary::default();
    if !doomed.is_empty() {
        store.delete_updates(&doomed)?;
        summary.deleted_updates = doomed;
    }

    let swept = store.delete_unused_assets()?;
    summary.deleted_assets = swept.len();
    for asset in &swept {
        let path = store.asset_path(asset);
        match remove_asset_file(&path) {
            Ok(()) => summary.deleted_files += 1,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to delete unused asset file");
                summary.failed_files.push(asset.relative_path.clone());
            }
        }
    }

    debug!(
        launched = %launched.id,
        deleted_updates = summary.deleted_updates.len(),
        deleted_assets = summary.deleted_assets,
        deleted_files = summary.deleted_files,
        failed_files = summary.failed_files.len(),
        "reaper pass complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_domain::{
        Asset, DevelopmentClientPolicy, FilterAwarePolicy, ManifestFilters, UpdateStatus,
    };
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};
    use time::macros::datetime;

    const SCOPE: &str = "scope";

    struct Fixture {
        temp: TempDir,
        store: UpdatesStore,
        config: UpdatesConfig,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let temp = tempdir()?;
            let store = UpdatesStore::open(temp.path())?;
            Ok(Self {
                temp,
                store,
                config: UpdatesConfig::new(SCOPE),
            })
        }

        /// Stores a ready update `n` whose launch bundle is `bundle-{n}.js`.
        fn ready_update(&self, n: u128, branch: &str) -> anyhow::Result<Update> {
            let update = Update::new(
                Uuid::from_u128(n),
                SCOPE,
                datetime!(2024-06-01 0:00 UTC) + time::Duration::hours(n as i64),
                "1",
                json!({"metadata": {"branchname": branch}}).to_string(),
            )
            .with_status(UpdateStatus::Ready);
            self.store.add_update(&update)?;
            let path = format!("bundle-{n}.js");
            fs::write(self.temp.path().join(&path), b"bundle")?;
            self.store.add_new_assets(
                &[Asset::new(Some(path.clone()), "js", path, format!("{n:064x}")).launch()],
                update.id,
            )?;
            Ok(update)
        }

        fn file_exists(&self, n: u128) -> bool {
            self.temp.path().join(format!("bundle-{n}.js")).exists()
        }
    }

    #[test]
    fn keeps_launched_and_one_fallback() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let oldest = fixture.ready_update(1, "main")?;
        let fallback = fixture.ready_update(2, "main")?;
        let launched = fixture.ready_update(3, "main")?;

        let summary =
            reap_unused_updates(&fixture.store, &fixture.config, &FilterAwarePolicy, &launched)?;
        assert_eq!(summary.deleted_updates, vec![oldest.id]);
        assert_eq!(summary.deleted_assets, 1);
        assert_eq!(summary.deleted_files, 1);
        assert!(summary.failed_files.is_empty());

        assert!(!fixture.file_exists(1));
        assert!(fixture.file_exists(2) && fixture.file_exists(3));
        assert!(fixture.store.update(fallback.id)?.is_some());
        Ok(())
    }

    #[test]
    fn fallback_prefers_an_update_matching_the_filters() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let matching = fixture.ready_update(1, "main")?;
        let other_branch = fixture.ready_update(2, "rollout")?;
        let launched = fixture.ready_update(3, "main")?;
        let mut filters = serde_json::Map::new();
        filters.insert("branchname".into(), json!("main"));
        fixture
            .store
            .set_manifest_filters(ManifestFilters(filters), SCOPE)?;

        let summary =
            reap_unused_updates(&fixture.store, &fixture.config, &FilterAwarePolicy, &launched)?;
        assert_eq!(summary.deleted_updates, vec![other_branch.id]);
        assert!(fixture.store.update(matching.id)?.is_some());
        Ok(())
    }

    #[test]
    fn launched_update_is_pinned_and_promoted() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let launched = Update::new(Uuid::from_u128(9), SCOPE, datetime!(2024-06-02 0:00 UTC), "1", "{}");
        fixture.store.add_update(&launched)?;

        reap_unused_updates(
            &fixture.store,
            &fixture.config,
            &DevelopmentClientPolicy::new(1),
            &launched,
        )?;
        let stored = fixture.store.update(launched.id)?.expect("launched update kept");
        assert_eq!(stored.status, UpdateStatus::Ready);
        assert!(stored.keep);
        Ok(())
    }

    #[test]
    fn development_policy_caps_the_store() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let mut ids = Vec::new();
        for n in 1..=4 {
            ids.push(fixture.ready_update(n, "main")?.id);
        }
        let launched = fixture.store.update(ids[0])?.expect("stored");

        let summary = reap_unused_updates(
            &fixture.store,
            &fixture.config,
            &DevelopmentClientPolicy::new(2),
            &launched,
        )?;
        assert_eq!(summary.deleted_updates.len(), 2);
        assert!(!summary.deleted_updates.contains(&launched.id));
        assert_eq!(fixture.store.all_updates()?.len(), 2);
        assert_eq!(summary.deleted_files, 2);
        Ok(())
    }

    #[test]
    fn unremovable_file_is_reported_not_fatal() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let doomed = fixture.ready_update(1, "main")?;
        fixture.ready_update(2, "main")?;
        let launched = fixture.ready_update(3, "main")?;
        let path = fixture.temp.path().join("bundle-1.js");
        fs::remove_file(&path)?;
        fs::create_dir(&path)?;
        fs::write(path.join("blocker"), b"x")?;

        let summary =
            reap_unused_updates(&fixture.store, &fixture.config, &FilterAwarePolicy, &launched)?;
        assert_eq!(summary.deleted_updates, vec![doomed.id]);
        assert_eq!(summary.deleted_assets, 1);
        assert_eq!(summary.failed_files, vec!["bundle-1.js".to_string()]);
        assert!(fixture.store.asset("bundle-1.js")?.is_none(), "sweep stays committed");
        Ok(())
    }
}

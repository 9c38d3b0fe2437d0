//! What a launcher runs before choosing an update.

use serde::Serialize;
use uuid::Uuid;

use ota_domain::UpdatesConfig;

use crate::build_data::{ensure_build_data_is_consistent, BuildDataCheck};
use crate::error::Result;
use crate::integrity::{check_integrity, IntegrityReport};
use crate::store::{OpenReport, UpdatesStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub open: OpenReport,
    pub build_data: BuildDataCheck,
    pub integrity: IntegrityReport,
}

/// Guards against a changed build, then reconciles the store with disk.
pub fn prepare(
    store: &UpdatesStore,
    config: &UpdatesConfig,
    embedded_update_id: Option<Uuid>,
) -> Result<StartupReport> {
    let build_data = ensure_build_data_is_consistent(store, config)?;
    let integrity = check_integrity(store, embedded_update_id)?;
    Ok(StartupReport {
        open: store.open_report().clone(),
        build_data,
        integrity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_domain::{Asset, Update, UpdateStatus};
    use std::fs;
    use tempfile::tempdir;
    use time::OffsetDateTime;

    #[test]
    fn fresh_install_records_build_and_keeps_embedded_update() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let store = UpdatesStore::open(temp.path())?;
        let config = UpdatesConfig::new("scope");
        let embedded = Update::new(Uuid::from_u128(1), "scope", OffsetDateTime::now_utc(), "1", "{}")
            .with_status(UpdateStatus::Embedded);
        store.add_update(&embedded)?;
        store.add_new_assets(
            &[Asset::new(Some("app.bundle".into()), "js", "app.bundle", "00").launch()],
            embedded.id,
        )?;
        fs::write(temp.path().join("app.bundle"), b"bundle")?;

        let report = prepare(&store, &config, Some(embedded.id))?;
        assert_eq!(report.open, OpenReport::Created);
        assert_eq!(report.build_data, BuildDataCheck::Recorded);
        assert!(report.integrity.is_clean());
        assert_eq!(store.launchable_updates("scope")?.len(), 1);

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["build_data"]["outcome"], "recorded");
        Ok(())
    }

    #[test]
    fn changed_build_is_cleared_before_integrity_runs() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let store = UpdatesStore::open(temp.path())?;
        let before = UpdatesConfig::new("scope").with_update_url("https://a.example");
        prepare(&store, &before, None)?;
        let stale = Update::new(Uuid::from_u128(2), "scope", OffsetDateTime::now_utc(), "1", "{}")
            .with_status(UpdateStatus::Ready);
        store.add_update(&stale)?;
        store.add_new_assets(&[Asset::new(Some("gone.js".into()), "js", "gone.js", "01")], stale.id)?;

        let after = UpdatesConfig::new("scope").with_update_url("https://b.example");
        let report = prepare(&store, &after, None)?;
        assert_eq!(report.build_data, BuildDataCheck::Reset { removed_updates: 1 });
        assert!(report.integrity.demoted_updates.is_empty());
        assert_eq!(report.integrity.missing_assets, vec!["gone.js".to_string()]);
        Ok(())
    }
}

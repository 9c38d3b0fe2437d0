//! Reconciles the database with the asset files actually on disk.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ota_domain::UpdateStatus;

use crate::error::Result;
use crate::files::asset_file_exists;
use crate::store::UpdatesStore;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub assets_checked: usize,
    /// Relative paths of asset rows whose file is gone.
    pub missing_assets: Vec<String>,
    /// Updates forced back to pending because an asset was missing.
    pub demoted_updates: Vec<Uuid>,
    /// Embedded updates that no longer match the binary's embedded update.
    pub removed_embedded_updates: Vec<Uuid>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_assets.is_empty() && self.removed_embedded_updates.is_empty()
    }
}

/// Demotes updates whose files went missing and drops stale embedded updates.
///
/// File checks run on the calling thread, never on the store's worker.
/// With no `embedded_update_id`, every embedded update is stale.
pub fn check_integrity(
    store: &UpdatesStore,
    embedded_update_id: Option<Uuid>,
) -> Result<IntegrityReport> {
    let assets = store.all_assets()?;
    let mut report = IntegrityReport {
        assets_checked: assets.len(),
        ..IntegrityReport::default()
    };

    let missing: Vec<_> = assets
        .into_iter()
        .filter(|asset| !asset_file_exists(&store.asset_path(asset)))
        .collect();
    if !missing.is_empty() {
        report.demoted_updates = store.mark_missing_assets(&missing)?;
        report.missing_assets = missing.into_iter().map(|asset| asset.relative_path).collect();
        warn!(
            missing = report.missing_assets.len(),
            demoted = report.demoted_updates.len(),
            "asset files are missing; owning updates must be downloaded again"
        );
    }

    let stale: Vec<Uuid> = store
        .updates_with_status(UpdateStatus::Embedded)?
        .into_iter()
        .map(|update| update.id)
        .filter(|id| Some(*id) != embedded_update_id)
        .collect();
    if !stale.is_empty() {
        store.delete_updates(&stale)?;
        info!(removed = stale.len(), "removed embedded updates from an earlier build");
        report.removed_embedded_updates = stale;
    }

    debug!(checked = report.assets_checked, clean = report.is_clean(), "integrity check finished");
    Ok(report)
}

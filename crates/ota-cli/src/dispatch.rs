use color_eyre::{eyre::eyre, Result};
use ota_core::{
    ensure_build_data_is_consistent, prepare, reap_unused_updates, BuildDataCheck,
    OpenReport, StoreSettings, UpdatesStore,
};
use ota_domain::{DevelopmentClientPolicy, FilterAwarePolicy, ReaperSelectionPolicy, Update};
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::cli::{AssetsArgs, CommandCli, PolicyArg, ReapArgs};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    /// The command succeeded but had to repair or discard stored state.
    Attention,
}

#[derive(Debug)]
pub struct Outcome {
    pub status: CommandStatus,
    pub message: String,
    pub details: Value,
    pub table: Option<Table>,
}

#[derive(Debug, Default)]
pub struct Table {
    pub header: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

impl CommandCli {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Assets(_) => "assets",
            Self::Doctor => "doctor",
            Self::CheckBuildData => "check-build-data",
            Self::Reap(_) => "reap",
        }
    }
}

pub fn dispatch_command(settings: &StoreSettings, command: &CommandCli) -> Result<Outcome> {
    let store = UpdatesStore::open(&settings.directory)?;
    debug!(database = %store.database_path().display(), "store ready");
    match command {
        CommandCli::Status => status(&store, settings),
        CommandCli::Assets(args) => assets(&store, args),
        CommandCli::Doctor => doctor(&store, settings),
        CommandCli::CheckBuildData => check_build_data(&store, settings),
        CommandCli::Reap(args) => reap(&store, settings, args),
    }
}

fn status(store: &UpdatesStore, settings: &StoreSettings) -> Result<Outcome> {
    let scope = settings.updates.scope_key.as_str();
    let updates = store.updates_for_scope(scope)?;
    let launchable = store.launchable_updates(scope)?;
    let assets = store.all_assets()?;
    let report = store.open_report();
    let open = serde_json::to_value(report)?;

    let mut table = Table {
        header: vec!["ID", "STATUS", "COMMITTED", "LAUNCHES", "KEEP"],
        rows: Vec::with_capacity(updates.len()),
    };
    for update in &updates {
        table.rows.push(vec![
            update.id.to_string(),
            update.status.as_str().to_string(),
            update.commit_time.format(&Rfc3339)?,
            format!(
                "{}/{}",
                update.successful_launch_count, update.failed_launch_count
            ),
            if update.keep { "yes" } else { "no" }.to_string(),
        ]);
    }

    Ok(Outcome {
        status: status_for_open(report),
        message: format!(
            "{} ({} updates, {} launchable, {} assets)",
            describe_open(report),
            updates.len(),
            launchable.len(),
            assets.len()
        ),
        details: json!({
            "open": open,
            "database": store.database_path().display().to_string(),
            "scope": scope,
            "updates": updates.iter().map(update_summary).collect::<Vec<_>>(),
            "launchable": launchable.iter().map(|update| update.id).collect::<Vec<_>>(),
            "assets": assets.len(),
        }),
        table: (!table.rows.is_empty()).then_some(table),
    })
}

fn assets(store: &UpdatesStore, args: &AssetsArgs) -> Result<Outcome> {
    let assets = match args.update {
        Some(id) => {
            if store.update(id)?.is_none() {
                return Err(eyre!("no stored update with id {id}"));
            }
            store.assets_for_update(id)?
        }
        None => store.all_assets()?,
    };

    let mut table = Table {
        header: vec!["KEY", "TYPE", "PATH", "LAUNCH", "ON DISK"],
        rows: Vec::with_capacity(assets.len()),
    };
    let mut listed = Vec::with_capacity(assets.len());
    for asset in &assets {
        let on_disk = store.asset_path(asset).is_file();
        table.rows.push(vec![
            asset.key.clone().unwrap_or_else(|| "-".to_string()),
            asset.asset_type.clone(),
            asset.relative_path.clone(),
            if asset.is_launch_asset { "yes" } else { "" }.to_string(),
            if on_disk { "yes" } else { "missing" }.to_string(),
        ]);
        listed.push(json!({
            "id": asset.id,
            "key": asset.key,
            "type": asset.asset_type,
            "relative_path": asset.relative_path,
            "hash": asset.hash,
            "launch": asset.is_launch_asset,
            "on_disk": on_disk,
        }));
    }

    Ok(Outcome {
        status: CommandStatus::Ok,
        message: format!("{} assets", assets.len()),
        details: json!({ "update": args.update, "assets": listed }),
        table: (!table.rows.is_empty()).then_some(table),
    })
}

fn doctor(store: &UpdatesStore, settings: &StoreSettings) -> Result<Outcome> {
    let report = prepare(store, &settings.updates, settings.embedded_update_id)?;
    let repaired = status_for_open(&report.open) == CommandStatus::Attention
        || matches!(report.build_data, BuildDataCheck::Reset { .. })
        || !report.integrity.is_clean();

    let integrity = &report.integrity;
    let message = format!(
        "{}; {}; checked {} assets, {} missing, {} updates demoted, {} embedded updates removed",
        describe_open(&report.open),
        describe_build_data(&report.build_data),
        integrity.assets_checked,
        integrity.missing_assets.len(),
        integrity.demoted_updates.len(),
        integrity.removed_embedded_updates.len(),
    );
    Ok(Outcome {
        status: if repaired {
            CommandStatus::Attention
        } else {
            CommandStatus::Ok
        },
        message,
        details: serde_json::to_value(&report)?,
        table: None,
    })
}

fn check_build_data(store: &UpdatesStore, settings: &StoreSettings) -> Result<Outcome> {
    let check = ensure_build_data_is_consistent(store, &settings.updates)?;
    Ok(Outcome {
        status: match check {
            BuildDataCheck::Reset { .. } => CommandStatus::Attention,
            BuildDataCheck::Recorded | BuildDataCheck::Unchanged => CommandStatus::Ok,
        },
        message: describe_build_data(&check),
        details: json!({ "scope": settings.updates.scope_key, "build_data": check }),
        table: None,
    })
}

fn reap(store: &UpdatesStore, settings: &StoreSettings, args: &ReapArgs) -> Result<Outcome> {
    let launched = store
        .update(args.launched)?
        .ok_or_else(|| eyre!("no stored update with id {}", args.launched))?;
    let policy: Box<dyn ReaperSelectionPolicy> = match args.policy {
        PolicyArg::FilterAware => Box::new(FilterAwarePolicy),
        PolicyArg::Development => Box::new(DevelopmentClientPolicy::new(args.keep)),
    };
    let summary = reap_unused_updates(store, &settings.updates, policy.as_ref(), &launched)?;

    Ok(Outcome {
        status: if summary.failed_files.is_empty() {
            CommandStatus::Ok
        } else {
            CommandStatus::Attention
        },
        message: format!(
            "removed {} updates and {} assets ({} files deleted, {} failed)",
            summary.deleted_updates.len(),
            summary.deleted_assets,
            summary.deleted_files,
            summary.failed_files.len()
        ),
        details: serde_json::to_value(&summary)?,
        table: None,
    })
}

fn update_summary(update: &Update) -> Value {
    json!({
        "id": update.id,
        "status": update.status,
        "commit_time": update.commit_time.format(&Rfc3339).ok(),
        "runtime_version": update.runtime_version,
        "keep": update.keep,
        "successful_launch_count": update.successful_launch_count,
        "failed_launch_count": update.failed_launch_count,
        "launchable": update.is_launchable(),
    })
}

fn status_for_open(report: &OpenReport) -> CommandStatus {
    match report {
        OpenReport::Existing | OpenReport::Created | OpenReport::Migrated { .. } => {
            CommandStatus::Ok
        }
        OpenReport::RecreatedAfterFailedMigration { .. }
        | OpenReport::RecreatedAfterCorruption { .. }
        | OpenReport::RecreatedAfterSchemaMismatch { .. } => CommandStatus::Attention,
    }
}

fn describe_open(report: &OpenReport) -> String {
    match report {
        OpenReport::Existing => "opened existing store".to_string(),
        OpenReport::Created => "created new store".to_string(),
        OpenReport::Migrated { from } => format!("migrated store from schema v{from}"),
        OpenReport::RecreatedAfterFailedMigration { from } => {
            format!("migration from schema v{from} failed; store recreated")
        }
        OpenReport::RecreatedAfterCorruption { archive } => format!(
            "store was corrupt; archived to {} and recreated",
            archive.display()
        ),
        OpenReport::RecreatedAfterSchemaMismatch {
            found_version,
            archive,
        } => format!(
            "store schema was incomplete (version {found_version}); archived to {} and recreated",
            archive.display()
        ),
    }
}

fn describe_build_data(check: &BuildDataCheck) -> String {
    match check {
        BuildDataCheck::Recorded => "recorded build data".to_string(),
        BuildDataCheck::Unchanged => "build data unchanged".to_string(),
        BuildDataCheck::Reset { removed_updates } => {
            format!("build data changed; removed {removed_updates} updates")
        }
    }
}

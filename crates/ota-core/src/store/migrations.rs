//! Forward schema migrations.
//!
//! Each step is a pure transform of an open transaction from one schema
//! version to the next. Steps that rebuild a table run with foreign keys
//! disabled on the connection, so dependent rows are pruned explicitly.

use anyhow::{Context, Result};
use rusqlite::{params, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use ota_domain::unix_millis;

/// One schema transition, `from` to `to`.
#[derive(Clone, Copy)]
pub(crate) struct Migration {
    pub(crate) from: u32,
    pub(crate) to: u32,
    pub(crate) apply: fn(&Transaction<'_>) -> Result<()>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Every known migration in application order.
pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 4,
        to: 5,
        apply: v4_to_v5,
    },
    Migration {
        from: 5,
        to: 6,
        apply: v5_to_v6,
    },
    Migration {
        from: 6,
        to: 7,
        apply: v6_to_v7,
    },
    Migration {
        from: 7,
        to: 8,
        apply: v7_to_v8,
    },
    Migration {
        from: 8,
        to: 9,
        apply: v8_to_v9,
    },
    Migration {
        from: 9,
        to: 10,
        apply: v9_to_v10,
    },
    Migration {
        from: 10,
        to: 11,
        apply: v10_to_v11,
    },
];

const UPDATES_INDICES: &str = r#"
CREATE UNIQUE INDEX "index_updates_scope_key_commit_time" ON "updates" ("scope_key", "commit_time");
CREATE INDEX "index_updates_launch_asset_id" ON "updates" ("launch_asset_id");
"#;

/// `assets.key` becomes nullable.
fn v4_to_v5(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
CREATE TABLE "new_assets" (
  "id" INTEGER PRIMARY KEY AUTOINCREMENT,
  "url" TEXT,
  "key" TEXT UNIQUE,
  "headers" TEXT,
  "type" TEXT NOT NULL,
  "metadata" TEXT,
  "download_time" INTEGER NOT NULL,
  "relative_path" TEXT NOT NULL,
  "hash" BLOB NOT NULL,
  "hash_type" INTEGER NOT NULL,
  "marked_for_deletion" INTEGER NOT NULL
);
INSERT INTO "new_assets" ("id", "url", "key", "headers", "type", "metadata", "download_time", "relative_path", "hash", "hash_type", "marked_for_deletion")
  SELECT "id", "url", "key", "headers", "type", "metadata", "download_time", "relative_path", "hash", "hash_type", "marked_for_deletion" FROM "assets";
DROP TABLE "assets";
ALTER TABLE "new_assets" RENAME TO "assets";
"#,
    )
    .context("failed to rebuild assets with a nullable key")?;
    debug!("assets.key is now nullable");
    Ok(())
}

/// `updates.metadata` is renamed to `manifest` and `last_accessed` is added.
fn v5_to_v6(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
CREATE TABLE "new_updates" (
  "id" BLOB UNIQUE,
  "scope_key" TEXT NOT NULL,
  "commit_time" INTEGER NOT NULL,
  "runtime_version" TEXT NOT NULL,
  "launch_asset_id" INTEGER,
  "manifest" TEXT,
  "status" INTEGER NOT NULL,
  "keep" INTEGER NOT NULL,
  "last_accessed" INTEGER NOT NULL,
  PRIMARY KEY("id"),
  FOREIGN KEY("launch_asset_id") REFERENCES "assets"("id") ON DELETE CASCADE
);
"#,
    )
    .context("failed to create the v6 updates table")?;
    let now = unix_millis(OffsetDateTime::now_utc());
    tx.execute(
        r#"INSERT INTO "new_updates" ("id", "scope_key", "commit_time", "runtime_version", "launch_asset_id", "manifest", "status", "keep", "last_accessed")
  SELECT "id", "scope_key", "commit_time", "runtime_version", "launch_asset_id", "metadata", "status", "keep", ?1 FROM "updates""#,
        params![now],
    )
    .context("failed to copy updates into the v6 table")?;
    tx.execute_batch(&format!(
        r#"DROP TABLE "updates";
ALTER TABLE "new_updates" RENAME TO "updates";
{UPDATES_INDICES}"#
    ))
    .context("failed to swap in the v6 updates table")?;
    Ok(())
}

/// Launch counters. Every update that already exists has launched before.
fn v6_to_v7(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
ALTER TABLE "updates" ADD COLUMN "successful_launch_count" INTEGER NOT NULL DEFAULT 0;
ALTER TABLE "updates" ADD COLUMN "failed_launch_count" INTEGER NOT NULL DEFAULT 0;
UPDATE "updates" SET "successful_launch_count" = 1;
"#,
    )
    .context("failed to add launch counters")?;
    Ok(())
}

fn v7_to_v8(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(r#"ALTER TABLE "assets" ADD COLUMN "extra_request_headers" TEXT;"#)
        .context("failed to add assets.extra_request_headers")?;
    Ok(())
}

fn v8_to_v9(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(r#"ALTER TABLE "assets" ADD COLUMN "expected_hash" TEXT;"#)
        .context("failed to add assets.expected_hash")?;
    Ok(())
}

/// Updates without a manifest are dropped and `manifest` becomes NOT NULL.
fn v9_to_v10(tx: &Transaction<'_>) -> Result<()> {
    let orphaned = tx
        .execute(
            r#"DELETE FROM "updates_assets" WHERE "update_id" IN (SELECT "id" FROM "updates" WHERE "manifest" IS NULL)"#,
            [],
        )
        .context("failed to unlink assets of manifest-less updates")?;
    let dropped = tx
        .execute(r#"DELETE FROM "updates" WHERE "manifest" IS NULL"#, [])
        .context("failed to delete manifest-less updates")?;
    debug!(dropped, orphaned, "removed updates without a manifest");

    tx.execute_batch(&format!(
        r#"
CREATE TABLE "new_updates" (
  "id" BLOB UNIQUE,
  "scope_key" TEXT NOT NULL,
  "commit_time" INTEGER NOT NULL,
  "runtime_version" TEXT NOT NULL,
  "launch_asset_id" INTEGER,
  "manifest" TEXT NOT NULL,
  "status" INTEGER NOT NULL,
  "keep" INTEGER NOT NULL,
  "last_accessed" INTEGER NOT NULL,
  "successful_launch_count" INTEGER NOT NULL DEFAULT 0,
  "failed_launch_count" INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY("id"),
  FOREIGN KEY("launch_asset_id") REFERENCES "assets"("id") ON DELETE CASCADE
);
INSERT INTO "new_updates" ("id", "scope_key", "commit_time", "runtime_version", "launch_asset_id", "manifest", "status", "keep", "last_accessed", "successful_launch_count", "failed_launch_count")
  SELECT "id", "scope_key", "commit_time", "runtime_version", "launch_asset_id", "manifest", "status", "keep", "last_accessed", "successful_launch_count", "failed_launch_count" FROM "updates";
DROP TABLE "updates";
ALTER TABLE "new_updates" RENAME TO "updates";
{UPDATES_INDICES}"#
    ))
    .context("failed to rebuild updates with a required manifest")?;
    Ok(())
}

/// Updates remember the server URL and request headers they came from.
fn v10_to_v11(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
ALTER TABLE "updates" ADD COLUMN "url" TEXT;
ALTER TABLE "updates" ADD COLUMN "headers" TEXT;
"#,
    )
    .context("failed to add update provenance columns")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::LATEST_SCHEMA_VERSION;

    #[test]
    fn migrations_form_a_contiguous_chain_to_latest() {
        let mut expected = MIGRATIONS[0].from;
        for step in MIGRATIONS {
            assert_eq!(step.from, expected, "gap before {step:?}");
            assert_eq!(step.to, step.from + 1);
            expected = step.to;
        }
        assert_eq!(expected, LATEST_SCHEMA_VERSION);
    }
}

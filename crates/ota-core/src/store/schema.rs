//! On-disk naming and the latest table layout.

/// Version of [`LATEST_SCHEMA`]. Each version lives in its own file.
pub const LATEST_SCHEMA_VERSION: u32 = 11;

const DATABASE_FILENAME_PREFIX: &str = "store-v";

/// File name holding the database for `version`, e.g. `store-v11.db`.
#[must_use]
pub fn database_filename(version: u32) -> String {
    format!("{DATABASE_FILENAME_PREFIX}{version}.db")
}

pub(crate) const LATEST_SCHEMA: &str = r#"
CREATE TABLE "updates" (
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
  "url" TEXT,
  "headers" TEXT,
  PRIMARY KEY("id"),
  FOREIGN KEY("launch_asset_id") REFERENCES "assets"("id") ON DELETE CASCADE
);
CREATE TABLE "assets" (
  "id" INTEGER PRIMARY KEY AUTOINCREMENT,
  "url" TEXT,
  "key" TEXT UNIQUE,
  "headers" TEXT,
  "expected_hash" TEXT,
  "extra_request_headers" TEXT,
  "type" TEXT NOT NULL,
  "metadata" TEXT,
  "download_time" INTEGER NOT NULL,
  "relative_path" TEXT NOT NULL,
  "hash" BLOB NOT NULL,
  "hash_type" INTEGER NOT NULL,
  "marked_for_deletion" INTEGER NOT NULL
);
CREATE TABLE "updates_assets" (
  "update_id" BLOB NOT NULL,
  "asset_id" INTEGER NOT NULL,
  FOREIGN KEY("update_id") REFERENCES "updates"("id") ON DELETE CASCADE,
  FOREIGN KEY("asset_id") REFERENCES "assets"("id") ON DELETE CASCADE
);
CREATE TABLE "json_data" (
  "id" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  "key" TEXT NOT NULL,
  "value" TEXT NOT NULL,
  "last_updated" INTEGER NOT NULL,
  "scope_key" TEXT NOT NULL
);
CREATE UNIQUE INDEX "index_updates_scope_key_commit_time" ON "updates" ("scope_key", "commit_time");
CREATE INDEX "index_updates_launch_asset_id" ON "updates" ("launch_asset_id");
CREATE INDEX "index_json_data_scope_key" ON "json_data" ("scope_key");
"#;

pub(crate) const EXPECTED_TABLES: [&str; 4] = ["updates", "assets", "updates_assets", "json_data"];

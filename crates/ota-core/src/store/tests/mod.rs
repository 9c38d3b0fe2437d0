//! Update store unit tests.

use super::*;
use tempfile::{tempdir, TempDir};
use time::{macros::datetime, Duration};

mod open;

const SCOPE: &str = "https://exp.host/@test/app";

fn new_store() -> anyhow::Result<(TempDir, UpdatesStore)> {
    let temp = tempdir()?;
    let store = UpdatesStore::open(temp.path().join("updates"))?;
    Ok((temp, store))
}

fn sample_update(n: u128) -> Update {
    let commit_time = datetime!(2024-03-01 12:00 UTC) + Duration::minutes(n as i64);
    Update::new(
        Uuid::from_u128(n),
        SCOPE,
        commit_time,
        "1.0.0",
        format!(r#"{{"id":"{}","metadata":{{"branchName":"main"}}}}"#, Uuid::from_u128(n)),
    )
}

fn sample_asset(name: &str) -> Asset {
    Asset::new(
        Some(name.to_string()),
        "application/javascript",
        name,
        format!("{:0>64}", hex::encode(name)),
    )
}

/// Raw connection to the store's database file, for assertions the public
/// surface does not expose.
fn raw_connection(store: &UpdatesStore) -> anyhow::Result<Connection> {
    Ok(Connection::open(store.database_path())?)
}

fn count(conn: &Connection, sql: &str) -> anyhow::Result<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

use super::*;

fn write_garbage(path: &Path) -> anyhow::Result<()> {
    fs::write(path, b"this file is definitely not sqlite ".repeat(128))?;
    Ok(())
}

#[test]
fn fresh_directory_creates_latest_schema() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let dir = temp.path().join("nested").join("updates");
    let store = UpdatesStore::open(&dir)?;
    assert_eq!(store.open_report(), &OpenReport::Created);
    assert_eq!(store.database_path(), dir.join("store-v11.db"));
    assert!(store.database_path().exists());
    assert!(store.all_updates()?.is_empty());
    Ok(())
}

#[test]
fn reopening_keeps_data() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let update = sample_update(1);
    {
        let store = UpdatesStore::open(temp.path())?;
        store.add_update(&update)?;
    }
    let store = UpdatesStore::open(temp.path())?;
    assert_eq!(store.open_report(), &OpenReport::Existing);
    assert!(store.update(update.id)?.is_some());
    Ok(())
}

#[test]
fn empty_database_file_receives_the_schema() -> anyhow::Result<()> {
    let temp = tempdir()?;
    fs::write(temp.path().join(database_filename(LATEST_SCHEMA_VERSION)), b"")?;
    let store = UpdatesStore::open(temp.path())?;
    assert_eq!(store.open_report(), &OpenReport::Existing);
    store.add_update(&sample_update(1))?;
    Ok(())
}

#[test]
fn corrupt_database_is_archived_and_recreated() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let latest = temp.path().join(database_filename(LATEST_SCHEMA_VERSION));
    write_garbage(&latest)?;

    let store = UpdatesStore::open(temp.path())?;
    let OpenReport::RecreatedAfterCorruption { archive } = store.open_report().clone() else {
        panic!("unexpected report {:?}", store.open_report());
    };
    assert!(archive.exists(), "archive missing at {}", archive.display());
    assert_eq!(archive.parent(), Some(temp.path()));
    let name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .expect("utf8 name");
    assert!(name.ends_with("-store-v11.db"), "unexpected archive name {name}");
    let stamp = name.trim_end_matches("-store-v11.db");
    assert!(stamp.parse::<i64>().is_ok(), "archive prefix is a timestamp: {name}");

    store.add_update(&sample_update(1))?;
    drop(store);
    let reopened = UpdatesStore::open(temp.path())?;
    assert_eq!(reopened.open_report(), &OpenReport::Existing);
    assert_eq!(reopened.all_updates()?.len(), 1);
    Ok(())
}

#[test]
fn archives_never_overwrite_each_other() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let latest = temp.path().join(database_filename(LATEST_SCHEMA_VERSION));

    write_garbage(&latest)?;
    let first = match UpdatesStore::open(temp.path())?.open_report().clone() {
        OpenReport::RecreatedAfterCorruption { archive } => archive,
        other => panic!("unexpected report {other:?}"),
    };
    write_garbage(&latest)?;
    let second = match UpdatesStore::open(temp.path())?.open_report().clone() {
        OpenReport::RecreatedAfterCorruption { archive } => archive,
        other => panic!("unexpected report {other:?}"),
    };
    assert_ne!(first, second);
    assert!(first.exists() && second.exists());
    Ok(())
}

#[test]
fn incomplete_schema_is_archived_and_recreated() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let latest = temp.path().join(database_filename(LATEST_SCHEMA_VERSION));
    let conn = Connection::open(&latest)?;
    conn.execute_batch("CREATE TABLE updates (id BLOB);")?;
    drop(conn);

    let store = UpdatesStore::open(temp.path())?;
    let OpenReport::RecreatedAfterSchemaMismatch {
        found_version,
        archive,
    } = store.open_report().clone()
    else {
        panic!("unexpected report {:?}", store.open_report());
    };
    assert_eq!(found_version, 0);
    assert!(archive.exists(), "archive missing at {}", archive.display());
    store.add_update(&sample_update(1))?;
    drop(store);

    let reopened = UpdatesStore::open(temp.path())?;
    assert_eq!(reopened.open_report(), &OpenReport::Existing);
    assert_eq!(reopened.all_updates()?.len(), 1);
    Ok(())
}

#[test]
fn unstamped_schema_is_not_trusted() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let latest = temp.path().join(database_filename(LATEST_SCHEMA_VERSION));
    let conn = Connection::open(&latest)?;
    conn.execute_batch(LATEST_SCHEMA)?;
    conn.pragma_update(None, "user_version", 7)?;
    drop(conn);

    let store = UpdatesStore::open(temp.path())?;
    assert!(
        matches!(
            store.open_report(),
            OpenReport::RecreatedAfterSchemaMismatch { found_version: 7, .. }
        ),
        "unexpected report {:?}",
        store.open_report()
    );
    Ok(())
}

#[test]
fn fresh_and_empty_files_are_stamped_with_the_latest_version() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let latest = temp.path().join(database_filename(LATEST_SCHEMA_VERSION));
    fs::write(&latest, b"")?;
    drop(UpdatesStore::open(temp.path())?);

    let conn = Connection::open(&latest)?;
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    assert_eq!(version, LATEST_SCHEMA_VERSION);
    Ok(())
}

#[test]
fn open_report_serializes_with_a_kind_tag() -> anyhow::Result<()> {
    let report = OpenReport::Migrated { from: 9 };
    assert_eq!(
        serde_json::to_value(&report)?,
        serde_json::json!({"kind": "migrated", "from": 9})
    );
    let mismatch = OpenReport::RecreatedAfterSchemaMismatch {
        found_version: 5,
        archive: PathBuf::from("/tmp/1-store-v11.db"),
    };
    assert_eq!(
        serde_json::to_value(&mismatch)?["kind"],
        "recreated-after-schema-mismatch"
    );
    Ok(())
}

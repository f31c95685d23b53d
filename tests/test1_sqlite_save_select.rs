#![cfg(feature = "sqlite")]

mod common;

use sql_client::prelude::*;
use tokio::runtime::Runtime;

#[test]
fn save_and_select_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("save.db"))?;
        assert!(client.connect().await?);
        client
            .query("create table people (id integer primary key, name text, note text)")
            .execute()
            .await?;

        let saved = client
            .save_data((1, "alice", "first"), Some("people"), SaveOptions::default())
            .await?;
        assert_eq!(saved, 1);

        let mapping = Argument::named([
            ("id", RowValues::Int(2)),
            ("name", RowValues::Text("bob".into())),
            ("note", RowValues::Text(String::new())),
        ]);
        let saved = client
            .save_data(mapping, Some("people"), SaveOptions::default())
            .await?;
        assert_eq!(saved, 1);
        assert_eq!(common::count(&mut client, "people").await?, 2);

        // pyformat in, qmark out; empty strings were stored as NULL
        let rows = client
            .query("select name, note from people where id = %(id)s")
            .args(Argument::named([("id", 2)]))
            .select()
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows.results[0].get("name").and_then(RowValues::as_text),
            Some("bob")
        );
        assert_eq!(rows.results[0].get("note"), Some(&RowValues::Null));

        let maps = client
            .query("select id, name from people order by id")
            .select()
            .await?
            .to_maps();
        assert_eq!(maps[0].get("name"), Some(&RowValues::Text("alice".into())));
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn pairs_then_mapping_then_count() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("t.db"))?;
        client.query("create table t (a integer, b integer)").execute().await?;

        assert_eq!(
            client.save_data((1, 2), Some("t"), SaveOptions::default()).await?,
            1
        );
        let rows = client.query("select * from t").select().await?;
        assert_eq!(rows.to_rows(), vec![vec![RowValues::Int(1), RowValues::Int(2)]]);

        let mapped = vec![Argument::named([("a", 3), ("b", 4)])];
        assert_eq!(
            client.save_data(mapped, Some("t"), SaveOptions::default()).await?,
            1
        );
        let rows = client.query("select count(*) from t").select().await?;
        assert_eq!(rows.to_rows(), vec![vec![RowValues::Int(2)]]);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn batches_run_together_or_one_by_one() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("batch.db"))?;
        client
            .query("create table kv (k text primary key, v integer)")
            .execute()
            .await?;

        let inserted = client
            .query("insert into kv values (%s, %s)")
            .args(vec![("a", 1), ("b", 2), ("c", 3)])
            .execute()
            .await?;
        assert_eq!(inserted, 3);

        let updated = client
            .query("update kv set v = v + 10 where k = :k")
            .args(vec![Argument::named([("k", "a")]), Argument::named([("k", "b")])])
            .options(QueryOptions::default().one_by_one())
            .execute()
            .await?;
        assert_eq!(updated, 2);

        let per_record = client
            .query("select v from kv where k = ?")
            .args(vec![("a",), ("c",)])
            .select_each()
            .await?;
        assert_eq!(per_record.len(), 2);
        assert_eq!(
            per_record[0].results[0].get("v").and_then(RowValues::as_int),
            Some(&11)
        );
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn save_data_uses_configured_table_and_keys() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let path = dir.path().join("table.db");
        let config = ClientConfig::new(DatabaseType::Sqlite)
            .with_database(path.to_string_lossy())
            .with_table("events")
            .with_retry(RetryPolicy::default().with_raise_error(true));
        let mut client = SqlClient::new(SqliteConnector::from_config(&config)?, config);
        client
            .query("create table events (id integer primary key autoincrement, kind text, at integer)")
            .execute()
            .await?;

        let saved = client
            .save_data(
                vec![("boot", 10), ("halt", 20)],
                None,
                SaveOptions::default().keys(["kind,at"]).together(),
            )
            .await?;
        assert_eq!(saved, 2);
        assert_eq!(common::count(&mut client, "events").await?, 2);

        let none = client
            .save_data(Vec::<(i64, i64)>::new(), None, SaveOptions::default())
            .await?;
        assert_eq!(none, 0);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn statement_errors_are_swallowed_unless_raised() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let path = dir.path().join("quiet.db");
        let config = ClientConfig::new(DatabaseType::Sqlite).with_database(path.to_string_lossy());
        let mut client = SqlClient::new(SqliteConnector::from_config(&config)?, config);

        let rows = client.query("select * from missing").select().await?;
        assert!(rows.is_empty());

        let err = client
            .query("select * from missing")
            .options(QueryOptions::default().raise_error(true))
            .select()
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Statement);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn format_sql_inlines_literals() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(DatabaseType::Sqlite).with_database(":memory:");
    let client = SqlClient::new(SqliteConnector::from_config(&config)?, config);
    let rendered = client.format_sql(
        "select * from t where name = %s and id = %s",
        Some(("o'brien", 4).into()),
    )?;
    assert_eq!(rendered, "select * from t where name = 'o''brien' and id = 4");
    Ok(())
}

#[test]
fn select_chunks_pages_rows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("pages.db"))?;
        client.query("create table t (a integer)").execute().await?;
        client
            .query("insert into t values (?)")
            .args(vec![(1,), (2,), (3,), (4,), (5,)])
            .execute()
            .await?;

        let pages = client
            .query("select a from t order by a")
            .select_chunks(2)
            .await?;
        let sizes: Vec<usize> = pages.map(|page| page.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let zero = client.query("select a from t").select_chunks(0).await;
        assert!(matches!(zero, Err(SqlClientError::ConfigError(_))));
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

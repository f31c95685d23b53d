#![cfg(feature = "sqlite")]

mod common;

use sql_client::prelude::*;
use tokio::runtime::Runtime;

fn jobs() -> TaskTable {
    TaskTable::new("jobs")
        .with_extra_fields(["payload"])
        .with_tried_field("tried")
        .with_finished_field("finished")
        .with_next_time_field("next_time")
}

async fn seed(client: &mut SqlClient<SqliteConnector>, rows: i64) -> Result<(), SqlClientError> {
    client
        .query(
            "create table jobs (id integer primary key, payload text, tried integer, \
             finished integer, next_time integer)",
        )
        .execute()
        .await?;
    let batch: Vec<(i64, String)> = (1..=rows).map(|id| (id, format!("job-{id}"))).collect();
    client
        .query("insert into jobs (id, payload, tried, finished, next_time) values (?, ?, 1, 0, 0)")
        .args(batch)
        .execute()
        .await?;
    Ok(())
}

async fn tried_of(
    client: &mut SqlClient<SqliteConnector>,
    id: i64,
) -> Result<(i64, i64, i64), SqlClientError> {
    let rows = client
        .query("select tried, finished, next_time from jobs where id = ?")
        .args(id)
        .select()
        .await?;
    let row = rows
        .results
        .first()
        .ok_or_else(|| SqlClientError::ExecutionError(format!("no job {id}")))?;
    let int = |name: &str| row.get(name).and_then(RowValues::as_int).copied().unwrap_or(-99);
    Ok((int("tried"), int("finished"), int("next_time")))
}

fn ids(rows: &ResultSet) -> Vec<i64> {
    rows.results
        .iter()
        .filter_map(|row| row.get("id").and_then(RowValues::as_int).copied())
        .collect()
}

#[test]
fn claim_end_fail_cancel() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("lease.db"))?;
        seed(&mut client, 3).await?;
        let table = jobs();

        let first = client
            .claim_tasks(&table, ClaimOptions::default().limit(2).select_extra(" order by id"))
            .await?;
        assert_eq!(ids(&first), vec![1, 2]);
        assert_eq!(
            first.results[0].get("payload").and_then(RowValues::as_text),
            Some("job-1")
        );
        assert_eq!(tried_of(&mut client, 1).await?.0, -1);
        assert!(client.autocommit());
        assert!(!client.in_transaction());

        let second = client.claim_tasks(&table, ClaimOptions::default().limit(2)).await?;
        assert_eq!(ids(&second), vec![3]);
        assert!(client.claim_tasks(&table, ClaimOptions::default()).await?.is_empty());

        // cancel puts the row back exactly as it was
        assert_eq!(client.cancel_tasks(&second, &table).await?, 1);
        assert_eq!(tried_of(&mut client, 3).await?, (1, 0, 0));
        let again = client.claim_tasks(&table, ClaimOptions::default()).await?;
        assert_eq!(ids(&again), vec![3]);

        assert_eq!(client.end_tasks(&first, &table).await?, 2);
        assert_eq!(tried_of(&mut client, 2).await?, (0, 1, 0));

        assert_eq!(client.fail_tasks(&again, &table).await?, 1);
        let (tried, finished, next_time) = tried_of(&mut client, 3).await?;
        assert_eq!((tried, finished), (2, 0));
        assert!(next_time > chrono::Utc::now().timestamp());

        // backed off, so nothing is due
        assert!(client.claim_tasks(&table, ClaimOptions::default()).await?.is_empty());
        let soon = client
            .claim_tasks(
                &table,
                ClaimOptions::default().next_time(TimeFilter::DueIn(3600)),
            )
            .await?;
        assert_eq!(ids(&soon), vec![3]);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn custom_filters_and_updates() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("custom.db"))?;
        seed(&mut client, 3).await?;
        let table = jobs();

        let claimed = client
            .claim_tasks(
                &table,
                ClaimOptions::default()
                    .unlimited()
                    .tried(TriedFilter::Expr(Comparison::new(">0")?))
                    .tried_after(CounterUpdate::Set(RowValues::Int(-7)))
                    .next_time_after(TimeUpdate::Set(RowValues::Int(42))),
            )
            .await?;
        assert_eq!(claimed.len(), 3);
        assert_eq!(tried_of(&mut client, 2).await?, (-7, 0, 42));

        let resolved = client
            .resolve_tasks(
                &claimed,
                &table,
                Outcome::Done,
                ResolveOverrides::default().finished(CounterUpdate::Set(RowValues::Int(9))),
            )
            .await?;
        assert_eq!(resolved, 3);
        assert_eq!(tried_of(&mut client, 1).await?, (0, 9, 0));

        let err = client
            .resolve_tasks(
                &claimed,
                &table,
                Outcome::Cancelled,
                ResolveOverrides::default().next_time(TimeUpdate::After(5)),
            )
            .await
            .unwrap_err();
        assert!(err.is_caller_error());
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn two_workers_never_share_a_row() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let path = dir.path().join("shared.db");
        let mut setup = common::sqlite_client(&path)?;
        seed(&mut setup, 3).await?;
        setup.close().await?;

        let mut a = common::sqlite_client(&path)?;
        let mut b = common::sqlite_client(&path)?;
        let table = jobs();
        let (left, right) = tokio::join!(
            a.claim_tasks(&table, ClaimOptions::default().limit(2)),
            b.claim_tasks(&table, ClaimOptions::default().limit(2)),
        );
        let mut all = ids(&left?);
        let right = ids(&right?);
        assert!(all.iter().all(|id| !right.contains(id)));
        all.extend(right);
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3]);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn fresh_rows_claimed_two_then_one() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut client = common::sqlite_client(&dir.path().join("fresh.db"))?;
        client
            .query("create table jobs (id integer primary key, tried integer, finished integer)")
            .execute()
            .await?;
        client
            .query("insert into jobs values (?, 0, 0)")
            .args(vec![(1,), (2,), (3,)])
            .execute()
            .await?;

        let table = TaskTable::new("jobs")
            .with_tried_field("tried")
            .with_finished_field("finished");
        let options = ClaimOptions::default()
            .tried(TriedFilter::Equals(RowValues::Int(0)))
            .tried_after(CounterUpdate::Set(RowValues::Int(-1)));

        let first = client.claim_tasks(&table, options.clone().limit(2)).await?;
        assert_eq!(first.len(), 2);
        let second = client.claim_tasks(&table, options.clone().limit(2)).await?;
        assert_eq!(second.len(), 1);
        assert!(client.claim_tasks(&table, options).await?.is_empty());
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

#[test]
fn single_row_goes_to_one_worker() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let path = dir.path().join("single.db");
        let mut setup = common::sqlite_client(&path)?;
        seed(&mut setup, 1).await?;
        setup.close().await?;

        let mut a = common::sqlite_client(&path)?;
        let mut b = common::sqlite_client(&path)?;
        let table = jobs();
        let (left, right) = tokio::join!(
            a.claim_tasks(&table, ClaimOptions::default()),
            b.claim_tasks(&table, ClaimOptions::default()),
        );
        let claimed = [left?.len(), right?.len()];
        assert_eq!(claimed.iter().sum::<usize>(), 1);
        Ok::<_, SqlClientError>(())
    })?;
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use sql_client::prelude::*;
use sql_client::test_utils::{Failure, MockConnector};

fn config(raise_error: bool) -> ClientConfig {
    ClientConfig::new(DatabaseType::Postgres).with_retry(
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_sleep_between(Duration::ZERO)
            .with_raise_error(raise_error),
    )
}

#[tokio::test(flavor = "current_thread")]
async fn connectivity_errors_reconnect_until_success() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    connector.fail_next(Failure::Connectivity("socket reset".into()));
    connector.fail_next(Failure::Connectivity("socket reset".into()));
    let mut client = SqlClient::new(connector.clone(), config(true));

    let n = client
        .query("update jobs set tried = ? where id = ?")
        .args((0, 7))
        .execute()
        .await?;
    assert_eq!(n, 1);
    assert_eq!(connector.connects(), 3);
    assert_eq!(
        connector.statements(),
        vec!["update jobs set tried = $1 where id = $2".to_string()]
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn exhausted_retries_yield_empty_results() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    for _ in 0..3 {
        connector.fail_next(Failure::Connectivity("down".into()));
    }
    let mut client = SqlClient::new(connector.clone(), config(false));
    let rows = client.query("select 1").select().await?;
    assert!(rows.is_empty());
    assert_eq!(connector.connects(), 3);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn exhausted_retries_raise_when_asked() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    for _ in 0..3 {
        connector.fail_next(Failure::Connectivity("down".into()));
    }
    let mut client = SqlClient::new(connector.clone(), config(false));
    let err = client
        .query("select 1")
        .options(QueryOptions::default().raise_error(true))
        .select()
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connectivity);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn statement_errors_roll_back_without_retry() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    connector.fail_next(Failure::Statement("duplicate key".into()));
    let mut client = SqlClient::new(connector.clone(), config(true).with_autocommit(false));

    let err = client
        .query("insert into jobs values (%s)")
        .args(1)
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, SqlClientError::ExecutionError(_)));
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.rollbacks(), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn normalization_errors_are_never_swallowed() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    let mut client = SqlClient::new(connector.clone(), config(false));
    let mixed: Argument = vec![Argument::from((1, 2)), Argument::named([("a", 1)])].into();
    let err = client
        .query("insert into t values (%s, %s)")
        .args(mixed)
        .execute()
        .await
        .unwrap_err();
    assert!(err.is_caller_error());
    assert!(connector.statements().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn connect_and_ping_recover() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    connector.fail_connect(Failure::Connectivity("refused".into()));
    let mut client = SqlClient::new(connector.clone(), config(true));
    assert!(client.connect().await?);
    assert!(client.is_connected());

    connector.fail_next(Failure::Connectivity("idle timeout".into()));
    client.ping().await?;
    assert_eq!(connector.connects(), 2);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn commit_follows_autocommit_off() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    let mut client = SqlClient::new(connector.clone(), config(true).with_autocommit(false));
    client
        .query("delete from jobs where id = ?")
        .args(3)
        .options(QueryOptions::default().commit(true))
        .execute()
        .await?;
    assert_eq!(connector.commits(), 1);

    client.query("delete from jobs where id = ?").args(4).execute().await?;
    assert_eq!(connector.commits(), 1);
    Ok(())
}

fn selected(ids: &[i64]) -> ResultSet {
    let mut rows = ResultSet::with_capacity(ids.len());
    rows.set_column_names(Arc::new(vec!["id".to_string()]));
    for id in ids {
        rows.add_row_values(vec![RowValues::Int(*id)]);
    }
    rows
}

#[tokio::test(flavor = "current_thread")]
async fn partial_claim_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    let mut client = SqlClient::new(connector.clone(), config(false));
    let table = TaskTable::new("jobs").with_tried_field("tried");

    connector.push_result(selected(&[1, 2]));
    connector.push_count(1);
    let rows = client
        .claim_tasks(&table, ClaimOptions::default().limit(2))
        .await?;
    assert!(rows.is_empty());
    assert_eq!(connector.rollbacks(), 1);
    assert_eq!(connector.commits(), 0);
    assert!(!client.in_transaction());
    assert!(client.autocommit());

    connector.push_result(selected(&[1, 2]));
    connector.push_count(1);
    let err = client
        .claim_tasks(&table, ClaimOptions::default().limit(2).raise_error(true))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlClientError::ClaimConflict(_)));
    assert_eq!(connector.rollbacks(), 2);
    assert_eq!(connector.commits(), 0);

    let statements = connector.statements();
    assert_eq!(statements.len(), 4);
    assert!(statements[1].starts_with("update jobs set tried=-tried where "));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unreachable_database_claims_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    for _ in 0..3 {
        connector.fail_connect(Failure::Connectivity("refused".into()));
    }
    let mut client = SqlClient::new(connector.clone(), config(false));
    let table = TaskTable::new("jobs").with_tried_field("tried");

    let rows = client.claim_tasks(&table, ClaimOptions::default()).await?;
    assert!(rows.is_empty());
    assert_eq!(connector.connects(), 0);
    assert!(!client.in_transaction());

    for _ in 0..3 {
        connector.fail_connect(Failure::Connectivity("refused".into()));
    }
    let err = client
        .claim_tasks(&table, ClaimOptions::default().raise_error(true))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connectivity);

    let rows = client.claim_tasks(&table, ClaimOptions::default()).await?;
    assert!(rows.is_empty());
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.commits(), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn procedures_follow_the_dialect() -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::postgres();
    let mut client = SqlClient::new(connector.clone(), config(true));
    client.call_proc("refresh_jobs", (7, "night"))?.execute().await?;
    client.call_proc("vacuum_jobs", Vec::<i64>::new())?.execute().await?;
    assert_eq!(
        connector.statements(),
        vec![
            "SELECT * FROM refresh_jobs($1, $2)".to_string(),
            "SELECT * FROM vacuum_jobs()".to_string(),
        ]
    );
    assert!(matches!(
        client.call_proc("refresh_jobs", Argument::named([("id", 7)])),
        Err(SqlClientError::ParameterError(_))
    ));

    let mut lite = SqlClient::new(MockConnector::sqlite(), ClientConfig::new(DatabaseType::Sqlite));
    assert!(matches!(
        lite.call_proc("refresh_jobs", 7),
        Err(SqlClientError::Unimplemented(_))
    ));
    Ok(())
}

//! Runs against a live server only when `RELQ_POSTGRES_HOST` is set; the
//! remaining connection settings come from `RELQ_POSTGRES_*` or defaults.

use relq_engine::demo::{add_member, registry, run, seed, MemberPath, Scenario, TeamPath};
use relq_engine::{
    ExecutionContext, PostgresConfig, PostgresContext, RelqResult, Session, SessionConfig, Tuple,
    Value,
};
use std::sync::Arc;

fn postgres_config() -> Option<PostgresConfig> {
    let host = std::env::var("RELQ_POSTGRES_HOST").ok()?;
    let defaults = PostgresConfig::default();
    Some(PostgresConfig {
        host,
        port: std::env::var("RELQ_POSTGRES_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.port),
        user: std::env::var("RELQ_POSTGRES_USER").unwrap_or(defaults.user),
        password: std::env::var("RELQ_POSTGRES_PASSWORD").unwrap_or(defaults.password),
        dbname: std::env::var("RELQ_POSTGRES_DB").unwrap_or(defaults.dbname),
        max_connections: 4,
        connect_timeout_secs: 5,
        statement_timeout_ms: Some(10_000),
    })
}

async fn seeded_session(config: PostgresConfig) -> RelqResult<Session> {
    let context = PostgresContext::connect(&config).await?;
    context
        .execute_batch("DROP TABLE IF EXISTS member; DROP TABLE IF EXISTS team")
        .await?;
    let session = Session::with_config(registry()?, Arc::new(context), SessionConfig::default());
    seed(&session).await?;
    Ok(session)
}

/// Fixture queries return the same answers as on SQLite
#[tokio::test]
async fn test_postgres_scenarios() -> RelqResult<()> {
    let Some(config) = postgres_config() else {
        eprintln!("RELQ_POSTGRES_HOST not set, skipping");
        return Ok(());
    };
    let session = seeded_session(config).await?;
    assert!(session.context().supports_concurrent_reads());

    for scenario in Scenario::all() {
        let report = run(&session, *scenario).await?;
        for row in &report.rows {
            assert_eq!(row.len(), report.columns.len());
        }
    }

    let group_by = run(&session, Scenario::GroupBy).await?;
    assert_eq!(
        group_by.rows,
        vec![
            vec![Value::from("teamA"), Value::Float(15.0)],
            vec![Value::from("teamB"), Value::Float(35.0)],
        ]
    );

    let paging = run(&session, Scenario::Paging).await?;
    assert_eq!(paging.rows.len(), 2);
    assert_eq!(paging.total, Some(4));

    // shares the seeded tables, so it must not run as a separate test
    check_parameter_typing(&session).await
}

/// NULL parameters and typed literals in the select list bind correctly
async fn check_parameter_typing(session: &Session) -> RelqResult<()> {
    add_member(session, None, 100, None).await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let unnamed = session
        .query()
        .select_from(&member)
        .filter(member.username().is_null())
        .fetch_count()
        .await?;
    assert_eq!(unnamed, 1);

    let rows: Vec<Tuple> = session
        .query()
        .select((member.username().concat("_").concat(member.age().string_value()), team.name()))
        .from(&member)
        .join(member.team(), &team)
        .filter(member.age().gt(35))
        .fetch()
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value_at(0), Some(&Value::from("member4_40")));
    Ok(())
}

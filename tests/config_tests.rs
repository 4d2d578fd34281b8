use relq_engine::demo::{registry, seed, MemberPath, Scenario};
use relq_engine::{
    CliRunner, Dialect, EngineConfig, ExecutionError, OutputFormat, RelqError, RelqResult, Session,
    SqliteContext,
};
use std::io::Write;
use std::sync::Arc;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

/// Session settings in the file reach sessions opened from it
#[tokio::test]
async fn test_session_settings_from_file() -> RelqResult<()> {
    let file = write_config(
        r#"{ "dialect": "Sqlite", "session": { "allow_deferred_loading": false } }"#,
    );
    let config = EngineConfig::from_file(file.path())?;
    assert!(!config.session.allow_deferred_loading);
    assert!(config.session.concurrent_count_query);

    let context = Arc::new(SqliteContext::open_in_memory()?);
    let session = Session::with_config(registry()?, context, config.session.clone());
    seed(&session).await?;

    let member = MemberPath::new("member");
    let mut found = session
        .query()
        .select_from(&member)
        .filter(member.username().eq("member2"))
        .fetch_one()
        .await?
        .expect("member2 exists");

    match session.load_association(&mut found, "team").await {
        Err(RelqError::Execution(ExecutionError::DeferredLoadingForbidden { reason, .. })) => {
            assert!(reason.contains("forbids"));
        }
        _ => panic!("Expected DeferredLoadingForbidden error"),
    }
    Ok(())
}

/// A file database configured for the demo outlives the context that wrote it
#[test]
fn test_demo_against_configured_file_database() -> RelqResult<()> {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("demo.db");
    let file = write_config(&format!(
        r#"{{ "dialect": "Sqlite", "sqlite": {{ "path": {}, "busy_timeout_ms": 1000 }} }}"#,
        serde_json::to_string(&db_path.to_string_lossy()).expect("json string")
    ));

    let runner = CliRunner::new(file.path().to_str())?;
    assert_eq!(runner.config().dialect, Dialect::Sqlite);

    let output = tokio_test::block_on(runner.run_demo(Some(Scenario::Aggregation), &OutputFormat::Json, false))?;
    let parsed: serde_json::Value = serde_json::from_str(output.trim()).expect("json output");
    assert_eq!(parsed["data"][0]["count(member)"], 4);
    assert!(db_path.exists());

    let reopened = SqliteContext::open(&db_path)?;
    let session = Session::new(registry()?, Arc::new(reopened));
    let member = MemberPath::new("member");
    let count = tokio_test::block_on(session.query().select_from(&member).fetch_count())?;
    assert_eq!(count, 4);
    Ok(())
}

/// The demo refuses a configuration that selects another backend
#[tokio::test]
async fn test_demo_requires_sqlite_dialect() -> RelqResult<()> {
    let file = write_config(
        r#"{ "dialect": "Postgres", "postgres": { "host": "localhost", "port": 5432, "user": "postgres",
             "password": "", "dbname": "postgres", "max_connections": 2, "connect_timeout_secs": 1,
             "statement_timeout_ms": null } }"#,
    );
    let runner = CliRunner::new(file.path().to_str())?;

    match runner.run_demo(None, &OutputFormat::Table, false).await {
        Err(RelqError::Configuration(message)) => assert!(message.contains("sqlite")),
        _ => panic!("Expected Configuration error"),
    }
    Ok(())
}

/// Malformed documents are configuration errors, not panics
#[test]
fn test_invalid_config_document() {
    let file = write_config(r#"{ "dialect": "Oracle" }"#);

    match EngineConfig::from_file(file.path()) {
        Err(RelqError::Configuration(message)) => assert!(message.contains("Invalid configuration")),
        _ => panic!("Expected Configuration error"),
    }
}

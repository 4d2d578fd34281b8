use clap::Parser;
use colored::*;
use std::sync::Arc;
use tracing::debug;
use crate::cli::{CliArgs, Commands, OutputFormat, OutputFormatter};
use crate::connectors::{RecordingContext, SqliteContext};
use crate::demo::{self, Scenario};
use crate::engine::{dialect::Dialect, session::Session};
use crate::utils::{
    config::EngineConfig,
    error::{RelqError, RelqResult},
};

/// Main CLI runner that handles command execution
pub struct CliRunner {
    config: EngineConfig,
}

impl CliRunner {
    /// Load the configuration file when one is given, defaults otherwise
    pub fn new(config_path: Option<&str>) -> RelqResult<Self> {
        let config = match config_path {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        debug!(dialect = %config.dialect, "configuration loaded");
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seeded SQLite session plus the recorder observing its statements
    async fn open_demo_session(&self) -> RelqResult<(Session, Arc<RecordingContext>)> {
        if self.config.dialect != Dialect::Sqlite {
            return Err(RelqError::Configuration(format!(
                "the demo runs on sqlite, configuration selects {}",
                self.config.dialect
            )));
        }
        let sqlite = match &self.config.sqlite {
            Some(sqlite) => SqliteContext::from_config(sqlite)?,
            None => SqliteContext::open_in_memory()?,
        };
        let recording = Arc::new(RecordingContext::new(Arc::new(sqlite)));
        let session = Session::with_config(
            demo::registry()?,
            recording.clone(),
            self.config.session.clone(),
        );
        demo::seed(&session).await?;
        recording.clear();
        Ok((session, recording))
    }

    /// Run one scenario, or all of them, and format the rows
    pub async fn run_demo(
        &self,
        scenario: Option<Scenario>,
        format: &OutputFormat,
        verbose: bool,
    ) -> RelqResult<String> {
        let (session, recording) = self.open_demo_session().await?;
        let scenarios = match scenario {
            Some(scenario) => vec![scenario],
            None => Scenario::all().to_vec(),
        };

        let mut output = String::new();
        for scenario in scenarios {
            let report = demo::run(&session, scenario).await?;
            if verbose {
                for statement in recording.statements() {
                    eprintln!("{}", OutputFormatter::format_info(&statement));
                }
            }
            recording.clear();
            output.push_str(&OutputFormatter::format_report(&report, format));
            output.push('\n');
        }
        session.close();
        Ok(output)
    }

    /// Compile a scenario for `dialect` without touching a database
    pub async fn run_explain(&self, scenario: Scenario, dialect: Dialect) -> RelqResult<String> {
        let context = Arc::new(SqliteContext::open_in_memory()?);
        let session = Session::new(demo::registry()?, context);
        let compiled = demo::explain(&session, scenario, dialect)?;
        Ok(format!(
            "{} {}\n{}",
            "Scenario".bold(),
            scenario.name().cyan().bold(),
            OutputFormatter::format_compiled(&compiled)
        ))
    }

    /// CREATE TABLE statements of the demo model
    pub fn run_schema(&self, dialect: Dialect) -> RelqResult<String> {
        let registry = demo::registry()?;
        Ok(OutputFormatter::format_statements(
            &registry.create_table_statements(dialect),
        ))
    }
}

/// Main entry point for CLI execution
pub async fn run_cli() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let runner = match CliRunner::new(args.config.as_deref()) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Commands::Demo { scenario, format, verbose } => {
            runner.run_demo(scenario, &format, verbose).await
        }
        Commands::Explain { scenario, dialect } => {
            runner.run_explain(scenario, dialect.into()).await
        }
        Commands::Schema { dialect } => runner.run_schema(dialect.into()),
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    }
}

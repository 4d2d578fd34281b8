use clap::{Parser, Subcommand, ValueEnum};
use crate::demo::Scenario;
use crate::engine::dialect::Dialect;

/// RELQ CLI - typed query builder and SQL compiler over an entity graph
#[derive(Parser, Debug)]
#[command(name = "relq")]
#[command(about = "Typed query builder, SQL compiler and execution engine")]
#[command(version = "0.1.0")]
pub struct CliArgs {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run member/team scenarios against a seeded SQLite database
    Demo {
        /// Scenario to run; all of them when omitted
        #[arg(short, long)]
        scenario: Option<Scenario>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Print every statement sent to the database
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the SQL and parameters a scenario compiles to
    Explain {
        scenario: Scenario,

        /// Target dialect
        #[arg(short, long, default_value = "sqlite")]
        dialect: DialectArg,
    },

    /// Print CREATE TABLE statements for the demo model
    Schema {
        /// Target dialect
        #[arg(short, long, default_value = "sqlite")]
        dialect: DialectArg,
    },
}

/// Output format options
#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    /// Formatted table output
    Table,
    /// JSON output
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Dialect names accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DialectArg {
    Sqlite,
    Postgres,
    Mysql,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => Dialect::Sqlite,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_demo_command() {
        let args = CliArgs::try_parse_from(["relq", "demo", "--scenario", "group-by", "--format", "json"]).unwrap();

        match args.command {
            Commands::Demo { scenario, format, verbose } => {
                assert_eq!(scenario, Some(Scenario::GroupBy));
                assert!(matches!(format, OutputFormat::Json));
                assert!(!verbose);
            }
            _ => panic!("Expected Demo command"),
        }
    }

    #[test]
    fn test_parse_explain_with_dialect() {
        let args = CliArgs::try_parse_from(["relq", "explain", "paging", "--dialect", "mysql"]).unwrap();

        match args.command {
            Commands::Explain { scenario, dialect } => {
                assert_eq!(scenario, Scenario::Paging);
                assert_eq!(Dialect::from(dialect), Dialect::MySql);
            }
            _ => panic!("Expected Explain command"),
        }
    }
}

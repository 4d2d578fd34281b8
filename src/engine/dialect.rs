use serde::{Deserialize, Serialize};
use std::fmt;
use crate::utils::types::DataType;

/// Target SQL dialect of the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Positional placeholder for the parameter at 1-based `index`
    ///
    /// PostgreSQL placeholders carry a cast so that untyped parameters in
    /// select lists and CASE branches get a definite type.
    pub fn placeholder(&self, index: usize, data_type: Option<DataType>) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => match data_type {
                Some(data_type) => format!("${}::{}", index, self.cast_type(data_type)),
                None => format!("${}", index),
            },
            Dialect::MySql => "?".to_string(),
        }
    }

    /// Column type used in CREATE TABLE
    pub fn column_type(&self, data_type: DataType) -> &'static str {
        match (self, data_type) {
            (Dialect::Sqlite, DataType::Integer) => "INTEGER",
            (Dialect::Sqlite, DataType::Float) => "REAL",
            (Dialect::Sqlite, DataType::Text) => "TEXT",
            (Dialect::Sqlite, DataType::Boolean) => "INTEGER",
            (_, DataType::Integer) => "BIGINT",
            (Dialect::Postgres, DataType::Float) => "DOUBLE PRECISION",
            (Dialect::MySql, DataType::Float) => "DOUBLE",
            (_, DataType::Text) => "VARCHAR(255)",
            (_, DataType::Boolean) => "BOOLEAN",
        }
    }

    /// Type name used in CAST and parameter casts
    pub fn cast_type(&self, data_type: DataType) -> &'static str {
        match (self, data_type) {
            (Dialect::Postgres, DataType::Integer) => "bigint",
            (Dialect::Postgres, DataType::Float) => "double precision",
            (Dialect::Postgres, DataType::Text) => "text",
            (Dialect::Postgres, DataType::Boolean) => "boolean",
            (Dialect::MySql, DataType::Integer) => "SIGNED",
            (Dialect::MySql, DataType::Float) => "DOUBLE",
            (Dialect::MySql, DataType::Text) => "CHAR",
            (Dialect::MySql, DataType::Boolean) => "UNSIGNED",
            (Dialect::Sqlite, DataType::Integer) | (Dialect::Sqlite, DataType::Boolean) => "INTEGER",
            (Dialect::Sqlite, DataType::Float) => "REAL",
            (Dialect::Sqlite, DataType::Text) => "TEXT",
        }
    }

    /// Auto-generated integer primary key column definition
    pub fn primary_key_definition(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Whether `NULLS FIRST` / `NULLS LAST` are understood natively
    pub fn supports_nulls_ordering(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Whether INSERT can return the generated key
    pub fn supports_returning(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Value accepted by LIMIT when only OFFSET is given
    pub fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("-1"),
            Dialect::MySql => Some("18446744073709551615"),
            Dialect::Postgres => None,
        }
    }

    /// Parser dialect used by `CompiledQuery::verify`
    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::Sqlite => Box::new(sqlparser::dialect::SQLiteDialect {}),
            Dialect::Postgres => Box::new(sqlparser::dialect::PostgreSqlDialect {}),
            Dialect::MySql => Box::new(sqlparser::dialect::MySqlDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(3, Some(DataType::Text)), "?3");
        assert_eq!(Dialect::Postgres.placeholder(1, Some(DataType::Integer)), "$1::bigint");
        assert_eq!(Dialect::Postgres.placeholder(2, None), "$2");
        assert_eq!(Dialect::MySql.placeholder(5, Some(DataType::Float)), "?");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(Dialect::Sqlite.column_type(DataType::Boolean), "INTEGER");
        assert_eq!(Dialect::Postgres.column_type(DataType::Float), "DOUBLE PRECISION");
        assert_eq!(Dialect::MySql.column_type(DataType::Text), "VARCHAR(255)");
    }

    #[test]
    fn test_capabilities() {
        assert!(Dialect::Sqlite.supports_nulls_ordering());
        assert!(!Dialect::MySql.supports_nulls_ordering());
        assert!(Dialect::Postgres.supports_returning());
        assert_eq!(Dialect::Postgres.unbounded_limit(), None);
    }
}

use thiserror::Error;

/// Main error type for the RELQ engine
#[derive(Debug, Error)]
pub enum RelqError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Expected at most one result but the query returned {count} rows")]
    TooManyResults { count: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Entity registration and lookup errors
#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("Entity '{0}' is already registered")]
    DuplicateEntity(String),

    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Entity '{entity}' must declare exactly one primary key, found {found}")]
    PrimaryKeyCount { entity: String, found: usize },

    #[error("Entity '{entity}' declares member '{name}' more than once")]
    DuplicateMember { entity: String, name: String },

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Association '{entity}.{association}' targets unregistered entity '{target}'")]
    UnregisteredTarget { entity: String, association: String, target: String },

    #[error("Association '{entity}.{association}' is mapped by '{mapped_by}', which is not a to-one association back to '{entity}'")]
    InvalidMappedBy { entity: String, association: String, mapped_by: String },

    #[error("Entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("Entity '{entity}' has no association '{association}'")]
    UnknownAssociation { entity: String, association: String },

    #[error("Field '{entity}.{field}' is declared as {declared} but was requested as {requested}")]
    FieldTypeMismatch { entity: String, field: String, declared: String, requested: String },

    #[error("Record of '{entity}' has no primary key value yet")]
    MissingIdentifier { entity: String },

    #[error("Association '{entity}.{association}' targets '{expected}', got a '{found}' record")]
    AssociationTargetMismatch { entity: String, association: String, expected: String, found: String },

    #[error("Association '{entity}.{association}' is not an owning to-one association")]
    NotOwningSide { entity: String, association: String },
}

/// Illegal combinations of builder calls
#[derive(Debug, Error, PartialEq)]
pub enum BuilderError {
    #[error("No join precedes this call: {0}")]
    NoJoinToModify(String),

    #[error("fetch_join() requires an association join, but join to '{0}' has no association path")]
    FetchJoinWithoutAssociation(String),

    #[error("Subquery must select exactly one expression, found {0}")]
    SubqueryProjection(usize),
}

/// Violations of compiler invariants
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("Query has no FROM clause")]
    MissingFrom,

    #[error("Query has no projection")]
    MissingProjection,

    #[error("Alias '{0}' is not declared in FROM or JOIN")]
    UnknownAlias(String),

    #[error("Alias '{0}' is declared more than once")]
    DuplicateAlias(String),

    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("Entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("Entity '{entity}' has no association '{association}'")]
    UnknownAssociation { entity: String, association: String },

    #[error("Join alias '{alias}' is declared as '{declared}' but association '{association}' targets '{target}'")]
    JoinTargetMismatch { alias: String, declared: String, association: String, target: String },

    #[error("Entity join to '{0}' requires an ON predicate")]
    MissingJoinCondition(String),

    #[error("Aggregate projections are mixed with non-aggregated expressions but no GROUP BY is present")]
    MissingGroupBy,

    #[error("Projection '{0}' is neither aggregated nor listed in GROUP BY")]
    UngroupedProjection(String),

    #[error("HAVING references '{0}', which is neither aggregated nor grouped")]
    InvalidHaving(String),

    #[error("LIMIT must not be negative, got {0}")]
    NegativeLimit(i64),

    #[error("OFFSET must not be negative, got {0}")]
    NegativeOffset(i64),

    #[error("Cannot compare {left} with {right}")]
    TypeMismatch { left: String, right: String },

    #[error("Subquery must select exactly one expression, found {0}")]
    SubqueryProjection(usize),

    #[error("Compiled statement failed the syntax check: {0}")]
    InvalidSyntax(String),
}

/// Backing store and result mapping failures
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Connection to backend failed: {0}")]
    ConnectionFailed(String),

    #[error("Statement failed: {message} (sql: {sql})")]
    StatementFailed { sql: String, message: String },

    #[error("Statement timed out: {0}")]
    Timeout(String),

    #[error("Statement was cancelled: {0}")]
    Cancelled(String),

    #[error("Cannot map result: {0}")]
    Mapping(String),

    #[error("Association '{entity}.{association}' is not loaded and deferred loading is not allowed: {reason}")]
    DeferredLoadingForbidden { entity: String, association: String, reason: String },

    #[error("Session is closed")]
    SessionClosed,
}

/// Result type alias for RELQ operations
pub type RelqResult<T> = Result<T, RelqError>;

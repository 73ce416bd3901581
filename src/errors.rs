use thiserror::Error;

/// Errors that can occur while resolving, merging, or storing graph records.
#[derive(Error, Debug)]
pub enum KgError {
    /// A resolver's backing call failed outright. Aborts the batch.
    #[error("resolution failure in {resolver}: {message}")]
    ResolutionFailure { resolver: String, message: String },

    /// A field is scalar in one record and collection-shaped in another for
    /// the same entity.
    #[error("schema conflict on '{field}' for {key}: stored as {existing}, incoming {incoming}")]
    SchemaConflict {
        key: String,
        field: String,
        existing: String,
        incoming: String,
    },

    /// A resolution policy set to `Error` was triggered. Carries every
    /// offending id collected across the batch.
    #[error(
        "resolution policy violated for {kind}: {} unmatched ids (no_match_behavior=Error), {} degenerate ids (multi_match_behavior=Error)",
        .unmatched.len(),
        .degenerate.len()
    )]
    PolicyViolation {
        kind: String,
        unmatched: Vec<String>,
        degenerate: Vec<String>,
    },

    #[error("database error: {message} (operation: {operation})")]
    Database { message: String, operation: String },

    #[error("graph store error: {message} (statement: {statement})")]
    Store { message: String, statement: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("parse error: {message} (path: {path}, line: {line:?})")]
    Parse {
        message: String,
        path: String,
        line: Option<usize>,
    },

    #[error("file error: {message} (path: {path})")]
    File { message: String, path: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results using `KgError`.
pub type Result<T> = std::result::Result<T, KgError>;

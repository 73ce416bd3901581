/// SQLite persistence.
///
/// One connection type serves both the cache-backed lookup table used by
/// resolvers and the document store used as a graph output.
mod connection;
mod queries;

pub use connection::Database;
pub use queries::{LookupRow, StoredEdge, StoredNode, MAX_SQL_VARIABLES};

//! Session database MCP server library.
//!
//! MCP tools over a single sticky database session: one connection per
//! database name, a current database, and default connection parameters
//! that later connections reuse. Stale connections are re-established when
//! switching back to a database.

pub mod config;
pub mod db;
pub mod error;
pub mod hints;
pub mod mcp;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::DbService;

//! MCP server integration module.
//!
//! Binds the session tools and resources to the MCP protocol using the
//! rmcp framework.

pub mod resources;
pub mod service;

pub use service::DbService;

//! Database access layer.
//!
//! - `handle`: the `Connector` / `DatabaseHandle` traits the session core uses
//! - `postgres`: the sqlx-backed implementation
//! - `params`: query parameter values and `$name` placeholder rewriting
//! - `schema`: catalog introspection through a handle
//! - `types`: row to JSON conversion

pub mod handle;
pub mod params;
pub mod postgres;
pub mod schema;
pub mod types;

pub use handle::{Connector, DatabaseHandle, JsonRow};
pub use params::{NamedQuery, ParamsInput, QueryParam};
pub use postgres::{PgConnector, PgHandle, TLS_SUPPORT, quote_identifier, quote_qualified};

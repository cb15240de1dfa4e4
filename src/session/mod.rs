//! Connection session: one sticky connection per database name, a current
//! database, and the parameters new connections are opened with.

pub mod lifecycle;
pub mod params;
pub mod registry;

pub use lifecycle::{CreateOutcome, HandleHealth, SessionManager, SessionStatus, SwitchOutcome};
pub use params::{ConnectTarget, ConnectionParameters, DEFAULT_DATABASE, Endpoint};
pub use registry::ConnectionRegistry;

//! Client for the RouterOS management API: framing, sessions, and typed
//! records for the collections the dashboard mirrors.

pub mod api;
pub mod client;
pub mod commands;
pub mod error;
pub mod net;
pub mod records;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Reply, Row};
pub use client::{
    ApiSession, ConnectTarget, Connector, Listener, RouterApi, RouterOsConnector, Transport,
    DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT,
};
pub use error::{ApiError, ConnectionError};
pub use records::{RemoteEntity, RemoteSecret, RemoteServiceProfile, RouterIdentity};

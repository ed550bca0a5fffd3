//! The xapiand node library: wires the database pool, schema cache,
//! scheduler, and discovery/replication crates behind one explicit
//! `XapiandManager` handle (spec.md §9 "no global statics").

pub mod config;
pub mod manager;

pub use config::ManagerConfig;
pub use manager::{http_and_binary_addrs, XapiandManager};

//! account-registry: a concurrent account registry server
//!
//! Clients hold a persistent TCP connection and exchange one JSON record per
//! line with the server:
//! - `set_balance` / `get_balance`
//! - `set_credit` / `get_credit`
//!
//! Features:
//! - Per-account locking, so requests on different accounts never contend
//! - Requests on one connection are answered strictly in order
//! - Domain errors are answered in-band; malformed records close only the
//!   offending connection
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

pub mod account;
pub mod client;
pub mod config;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

//! `QuickChat` server library.
//!
//! Exposes the delivery server for use in tests and embedding. The server
//! persists direct messages, answers the HTTP message API, and pushes new
//! messages to recipients that hold an open WebSocket channel.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod registry;
pub mod routes;
pub mod socket;
pub mod store;

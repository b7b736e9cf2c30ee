//! Shared protocol definitions for the `QuickChat` HTTP API and push channel.

pub mod api;
pub mod event;
pub mod message;

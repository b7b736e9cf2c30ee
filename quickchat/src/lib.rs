//! `QuickChat` client library.
//!
//! The client keeps a live view of one conversation and an unseen-message
//! count per peer, reconciled from three sources:
//!
//! - a bulk sidebar fetch on every (re)connect,
//! - `newMessage` pushes arriving on the WebSocket channel,
//! - history fetches when a conversation is opened.
//!
//! [`session::Session`] is the pure state machine; [`driver::SessionDriver`]
//! is the async loop that feeds it channel events and request completions.

pub mod api;
pub mod channel;
pub mod config;
pub mod driver;
pub mod session;

//! Shared library for the Voidcast feed relay.
//!
//! Holds everything the relay service needs that is independent of the chat
//! transport: feed row types and parsers, the star-chart node directory,
//! conditional HTTP fetch helpers, content fingerprinting, current-window
//! selection, and the persisted reconciliation state.

pub mod diff;
pub mod exports;
pub mod fetch;
pub mod models;
pub mod parsers;
pub mod state;
pub mod timeline;

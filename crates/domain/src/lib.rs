//! Shared types for the chat memory workspace: the conversational data
//! model, key derivation, configuration tree, error taxonomy, retry
//! combinator and structured trace events.

pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod retry;
pub mod trace;

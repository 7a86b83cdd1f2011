//! # mapper-protocol
//!
//! Webmapper command/event message types and codec.
//!
//! This crate defines the WebSocket message formats exchanged between the
//! mirror and its UI clients, plus the HTTP discovery document.

pub mod codec;
pub mod messages;

pub use codec::CodecError;
pub use messages::*;

//! dash-ai: wire protocol for the dash chat service
//!
//! This crate provides the request/response types, the incremental decoder
//! and line framer for streamed responses, and the HTTP transport.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ChatResponse, ChatTransport, HttpTransport};
pub use stream::{ByteStream, LineEvent, LineStream, frame_lines, parse_line};
pub use types::*;

//! JIM (JSON Instant Messaging) protocol layer.
//!
//! The protocol is a JSON-over-TCP line protocol: one transport read or
//! write carries exactly one UTF-8 JSON object of at most
//! [`codec::MAX_FRAME_LEN`] bytes, with no length prefix or delimiter.
//!
//! The crate is consumed by composition: the server and the client
//! each own their state machine and share only this codec/validator
//! layer:
//!
//! - [`codec`]: framing, timestamp stamping and ISO rendering.
//! - [`schema`]: action kinds, key names, required-field tables,
//!   status codes.
//! - [`validation`]: structural validation of decoded payloads.
//! - [`message`]: typed request/response sum types with smart
//!   constructors that guarantee schema validity at creation time.

pub mod codec;
pub mod message;
pub mod schema;
pub mod validation;

pub use codec::WireCodec;
pub use message::{ChatMessage, Frame, Request, Response};
pub use schema::ActionKind;
pub use validation::validate;

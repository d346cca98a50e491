//! Longeron HTTP/1.1 codec
//!
//! A [`longeron_core::codec::Codec`] implementation for HTTP/1.1:
//! - Request/response message types (`frame`)
//! - Header storage, name interning, decimal cache (`headers`)
//! - Parse limits (`config`)
//! - The decode state machine and serializer (`codec`)
//!
//! Chunked transfer decoding is deliberately unimplemented and fails
//! with an explicit unsupported-feature error.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod codec;
pub mod config;
pub mod frame;
pub mod headers;

pub use codec::HttpCodec;
pub use config::HttpConfig;
pub use frame::{Body, HttpFrame, HttpRequest, HttpResponse, Method, Status};
pub use headers::{canonical_name, decimal, HeaderName, Headers};

//! HTTP/1.1 protocol implementation.
//!
//! This module provides an HTTP/1.1 request/response codec that plugs into
//! the Longeron event loop via the [`Codec`](crate::Codec) contract.
//!
//! # Core Types
//!
//! - [`HttpCodec`] - decode/encode state machine (server or client side)
//! - [`HttpRequest`] / [`HttpResponse`] - message types with builder setters
//! - [`HttpFrame`] - either side of an exchange, one handler signature
//! - [`HttpConfig`] - parse limits (body size, header bytes, header count)
//!
//! # Quick Start
//!
//! ## Server
//!
//! ```rust,no_run
//! use longeron::http::{HttpCodec, HttpConfig, HttpFrame, HttpResponse, Status};
//! use longeron::{Acceptor, Connection, EngineOptions, EventLoopGroup, IoEventHandle};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! struct Hello;
//!
//! impl IoEventHandle<HttpFrame> for Hello {
//!     fn accept(
//!         &mut self,
//!         _conn: &mut Connection,
//!         frame: HttpFrame,
//!     ) -> longeron::Result<Option<HttpFrame>> {
//!         let Some(req) = frame.as_request() else {
//!             return Ok(None);
//!         };
//!         let resp = HttpResponse::new(Status::OK)
//!             .with_header("Content-Type", "text/plain")
//!             .with_body(format!("you asked for {}", req.path).into_bytes());
//!         Ok(Some(HttpFrame::Response(resp)))
//!     }
//! }
//!
//! let group = EventLoopGroup::new(EngineOptions::default())?;
//! let server = Acceptor::bind(
//!     &group,
//!     "127.0.0.1:8080".parse()?,
//!     || HttpCodec::server(HttpConfig::default()),
//!     || Hello,
//! )?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

// Re-export codec types
pub use longeron_http::{
    canonical_name, decimal, Body, HeaderName, Headers, HttpCodec, HttpConfig, HttpFrame,
    HttpRequest, HttpResponse, Method, Status,
};

/// Convenient imports for the HTTP protocol.
///
/// # Example
///
/// ```rust
/// use longeron::http::prelude::*;
///
/// // Now you have:
/// // - HttpCodec, HttpConfig, HttpFrame, HttpRequest, HttpResponse
/// // - Method, Status, Headers, Body
/// // - Bytes for zero-copy bodies
/// ```
pub mod prelude {
    pub use super::{
        Body, Headers, HttpCodec, HttpConfig, HttpFrame, HttpRequest, HttpResponse, Method, Status,
    };
    pub use bytes::Bytes;
}

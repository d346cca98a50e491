//! # Longeron
//!
//! An event-driven network I/O engine built on `io_uring`.
//!
//! ## Architecture
//!
//! Longeron is structured as an **I/O kernel** with clean layering:
//!
//! - **`longeron-core`**: Event loop group, pooled slab allocator, codec
//!   and handler contracts, server/client bootstrap
//! - **Protocol crates**: Codec state machines that plug into the core
//! - **`longeron`**: Public API surface (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! Each protocol is gated behind a feature flag to avoid loading unused code:
//!
//! - **`http`** - HTTP/1.1 request/response codec
//!
//! ```toml
//! [dependencies]
//! longeron = { version = "0.1", features = ["http"] }
//! ```
//!
//! ## Quick Start
//!
//! ### HTTP Server
//!
//! ```rust,no_run
//! # #[cfg(feature = "http")]
//! use longeron::http::{HttpCodec, HttpConfig, HttpFrame, HttpResponse, Status};
//! # #[cfg(feature = "http")]
//! use longeron::{Acceptor, Connection, EngineOptions, EventLoopGroup, IoEventHandle};
//!
//! # #[cfg(feature = "http")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! struct Hello;
//!
//! impl IoEventHandle<HttpFrame> for Hello {
//!     fn accept(
//!         &mut self,
//!         _conn: &mut Connection,
//!         _frame: HttpFrame,
//!     ) -> longeron::Result<Option<HttpFrame>> {
//!         let resp = HttpResponse::new(Status::OK).with_body("Hello, World!");
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
//!
//! ## Performance
//!
//! - **Zero-copy**: pooled buffer views ride from the codec to the socket
//! - **io_uring**: native Linux async I/O (via `compio`)
//! - **Share-nothing**: each event loop owns its connections and pool
//! - **Sans-IO codecs**: protocol logic is pure, testable, and runtime-agnostic

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;

pub use longeron_core::prelude::*;

pub mod dev_tracing;

// Protocol modules (opt-in via features)
#[cfg(feature = "http")]
pub mod http;

//! Longeron Core
//!
//! Event-driven network I/O engine building blocks:
//! - Worker event loops with lifecycle and task submission (`eventloop`)
//! - Pooled slab allocator and cursor byte buffers (`alloc`)
//! - Outbound write queue (`buffer`)
//! - Typed per-connection attribute storage (`attrs`)
//! - Protocol codec contract (`codec`)
//! - Application handler contract (`handler`)
//! - Connection state and handles (`connection`, `actor`)
//! - Byte-based backpressure (`backpressure`)
//! - Server/client bootstrap (`bootstrap`)
//! - TCP socket tuning (`tcp`)
//! - Error types (`error`)

// The alloc and tcp modules need raw pointer / raw fd access
#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::match_same_arms)]

pub mod actor;
pub mod alloc;
pub mod attrs;
pub mod backpressure;
pub mod bootstrap;
pub mod buffer;
pub mod codec;
pub mod connection;
pub mod error;
pub mod eventloop;
pub mod handler;
pub mod options;
pub mod tcp;
pub mod timeout;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::actor::ConnectionHandle;
    pub use crate::alloc::{ByteBuf, ByteView, PagePool, PoolConfig, WireBuf};
    pub use crate::attrs::{AttributeKey, AttributeMap, AttributeRegistry};
    pub use crate::backpressure::WriteBacklog;
    pub use crate::bootstrap::{Acceptor, Connector, ServerHandle};
    pub use crate::buffer::WriteQueue;
    pub use crate::codec::{Codec, EncodeOutput};
    pub use crate::connection::{ConnState, Connection};
    pub use crate::error::{CoreError, DecodeError, EncodeError, Result};
    pub use crate::eventloop::{EventLoop, EventLoopGroup, LoopContext, LoopState};
    pub use crate::handler::IoEventHandle;
    pub use crate::options::EngineOptions;
    pub use crate::tcp::{enable_tcp_keepalive, enable_tcp_nodelay};
}

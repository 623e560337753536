//! # Lanlink Protocol
//!
//! Core definitions for the lanlink networking stack.
//!
//! This crate provides:
//! - [`GameMsg`]: the message envelope (tag byte + typed binary payload)
//! - [`MsgWriter`]/[`MsgReader`]: typed cursor encode/decode with
//!   truncation-safe reads
//! - [`MsgTag`]: the reserved baseline tag catalogue
//! - [`Compression`]: connection-wide payload compression policy
//! - [`NetConfig`]: ports, intervals, and bounded-wait budgets
//! - [`CancelToken`]: cooperative cancellation for long-running loops
//! - [`ContextRunner`]: the consumer-context collaborator for deferred
//!   message dispatch
//!
//! ## Example
//!
//! ```
//! use lanlink_protocol::{GameMsg, MsgWriter, USER_TAGS_START};
//!
//! let mut w = MsgWriter::new(USER_TAGS_START);
//! w.put_str("alice");
//! w.put_i32(3);
//! let msg = w.finish();
//!
//! let mut r = msg.reader();
//! assert_eq!(r.read_str().unwrap(), "alice");
//! assert_eq!(r.read_i32().unwrap(), 3);
//! ```

pub mod cancel;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod msg;

pub use cancel::CancelToken;
pub use compression::{Compression, CompressionError, Compressor, NoCompressor, ZstdCompressor};
pub use config::{
    NetConfig, DEFAULT_ADVERTISEMENT, DEFAULT_DISCOVERY_PORT, DEFAULT_PROGRESS_THRESHOLD,
    DEFAULT_TCP_PORT,
};
pub use context::{ContextRunner, ContextTask, SpawnRunner, TaskQueue};
pub use error::{EnvelopeError, EnvelopeResult};
pub use msg::{GameMsg, MsgReader, MsgTag, MsgWriter, Wire, USER_TAGS_START};

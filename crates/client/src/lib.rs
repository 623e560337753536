//! # Lanlink Client
//!
//! The client abstraction: a polymorphic entity with a server-assigned
//! identity, a handler table keyed by message tag, and two transports —
//! [`LocalClient`] (two instances wired directly to each other, no
//! network I/O) and [`RemoteClient`] (a TCP connection with a send
//! queue, concurrent reader/writer loops, and reconnection).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lanlink_client::{Client, Handlers, RemoteClient};
//! use lanlink_protocol::{NetConfig, SpawnRunner, USER_TAGS_START};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut handlers = Handlers::new();
//!     handlers.on(USER_TAGS_START, |_client, reader| {
//!         let text = reader.read_str()?;
//!         println!("chat: {text}");
//!         Ok(())
//!     });
//!
//!     let ctx = Arc::new(SpawnRunner::new());
//!     let client = RemoteClient::connect(
//!         "192.168.1.10:44444".parse().unwrap(),
//!         handlers,
//!         ctx,
//!         NetConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     client.send_connect("my-laptop");
//! }
//! ```

pub mod handlers;
pub mod local;
pub mod remote;

pub use handlers::{HandlerFn, Handlers, SharedHandlers};
pub use local::LocalClient;
pub use remote::RemoteClient;

use lanlink_protocol::GameMsg;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Process-unique key naming one client instance. The registry uses it
/// to keep its two lookup directions in sync; it never travels on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey(u64);

impl ClientKey {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// Common contract across client transports.
///
/// `send` never blocks on I/O from the caller's perspective — at most
/// it enqueues. `close` releases the transport and any waiters and is
/// idempotent. `disconnect` is the graceful variant: a Disconnect
/// envelope is flushed best-effort before closing, and the client will
/// not attempt to reconnect afterwards.
pub trait Client: Send + Sync {
    fn key(&self) -> ClientKey;

    /// Server-assigned identity. 0 is valid and not reserved.
    fn id(&self) -> u32;

    /// Mutated only by the connect/reconnect handshake (and by the
    /// server when assigning identities).
    fn set_id(&self, id: u32);

    fn send(&self, msg: GameMsg);

    fn close(&self);

    fn disconnect(&self);

    /// Sends the Connect envelope carrying this device's display name.
    fn send_connect(&self, device_label: &str) {
        self.send(GameMsg::connect(device_label));
    }
}

/// Client-side transport errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Compression(#[from] lanlink_protocol::CompressionError),

    #[error(transparent)]
    Envelope(#[from] lanlink_protocol::EnvelopeError),
}

//! Tunable constants for the lanlink stack
//!
//! The poll intervals exist to bound CPU use against check-then-sleep
//! style loops and the bounded waits during shutdown; they carry no
//! timing semantics beyond that.

use crate::compression::Compression;
use std::time::Duration;

/// Default TCP port for the stream protocol.
pub const DEFAULT_TCP_PORT: u16 = 44444;

/// Default UDP port for session discovery broadcasts.
pub const DEFAULT_DISCOVERY_PORT: u16 = 40404;

/// Default advertisement text sent by a host.
pub const DEFAULT_ADVERTISEMENT: &str = "New Game";

/// Payload size above which intermediate progress notifications are
/// delivered while a message is still being read.
pub const DEFAULT_PROGRESS_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Stream protocol port.
    pub tcp_port: u16,

    /// Discovery broadcast port. 0 binds an ephemeral port (tests).
    pub discovery_port: u16,

    /// Advertisement text broadcast by a host.
    pub advertisement: String,

    /// Interval between discovery broadcasts.
    pub advertise_interval: Duration,

    /// Writer backoff while the send queue is empty.
    pub write_poll: Duration,

    /// Backoff after a failed accept on the server listener.
    pub accept_poll: Duration,

    /// Poll interval while waiting for the send queue to drain during
    /// a graceful disconnect.
    pub drain_poll: Duration,

    /// Bounded wait for the send queue to drain during a graceful
    /// disconnect.
    pub drain_wait: Duration,

    /// Bounded wait for connection tasks to exit during close/stop.
    pub close_wait: Duration,

    /// Delay before reopening a discovery socket after an error.
    pub reopen_delay: Duration,

    /// Inbound payload size above which MsgProgress notifications are
    /// delivered during assembly.
    pub progress_threshold: usize,

    /// Connection-wide payload compression. Both ends must agree.
    pub compression: Compression,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            advertisement: DEFAULT_ADVERTISEMENT.to_string(),
            advertise_interval: Duration::from_secs(1),
            write_poll: Duration::from_millis(100),
            accept_poll: Duration::from_millis(10),
            drain_poll: Duration::from_millis(10),
            drain_wait: Duration::from_secs(1),
            close_wait: Duration::from_secs(1),
            reopen_delay: Duration::from_secs(1),
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            compression: Compression::None,
        }
    }
}

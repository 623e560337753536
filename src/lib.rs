//! # Lanlink
//!
//! A peer-discovery-and-messaging layer for small LAN multiplayer
//! sessions: a host advertises itself over UDP broadcast, clients
//! discover and connect to it over TCP, and both sides exchange typed,
//! length-framed binary messages through per-connection read/write
//! pipelines that tolerate transient disconnection.
//!
//! ## Components
//!
//! - `lanlink-protocol`: message envelope, tag catalogue, compression,
//!   configuration, and shared runtime primitives
//! - `lanlink-client`: client abstraction with in-process paired and
//!   remote TCP transports
//! - `lanlink-server`: server coordinator and client registry
//! - `lanlink-discovery`: UDP broadcast session discovery

pub use lanlink_client as client;
pub use lanlink_discovery as discovery;
pub use lanlink_protocol as protocol;
pub use lanlink_server as server;

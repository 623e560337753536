//! Tag-keyed handler tables
//!
//! A [`Handlers`] table maps a message tag to the callbacks invoked
//! when an envelope with that tag is dispatched. Tables are mutable
//! only during setup; [`Handlers::freeze`] produces the immutable
//! [`SharedHandlers`] form that connections dispatch against, so no
//! lock is held while user callbacks run.

use crate::Client;
use lanlink_protocol::{EnvelopeError, GameMsg, MsgReader};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Callback invoked for one dispatched envelope. Receives the client
/// the envelope arrived on and a payload cursor positioned past the
/// tag byte.
pub type HandlerFn =
    dyn Fn(&Arc<dyn Client>, &mut MsgReader<'_>) -> Result<(), EnvelopeError> + Send + Sync;

/// Mutable handler table, populated during setup and then frozen.
///
/// Multiple handlers may be registered for the same tag; they run in
/// registration order, each over a fresh payload cursor.
#[derive(Default)]
pub struct Handlers {
    map: HashMap<u8, Vec<Box<HandlerFn>>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for `tag`.
    pub fn on<F>(&mut self, tag: u8, handler: F)
    where
        F: Fn(&Arc<dyn Client>, &mut MsgReader<'_>) -> Result<(), EnvelopeError>
            + Send
            + Sync
            + 'static,
    {
        self.map.entry(tag).or_default().push(Box::new(handler));
    }

    /// Moves every registration from `other` into this table,
    /// preserving per-tag order. `other`'s handlers run after any
    /// already registered here for the same tag.
    pub fn extend(&mut self, other: Handlers) {
        for (tag, handlers) in other.map {
            self.map.entry(tag).or_default().extend(handlers);
        }
    }

    /// Seals the table. Connections only ever see the frozen form.
    pub fn freeze(self) -> SharedHandlers {
        SharedHandlers(Arc::new(self))
    }
}

/// Immutable, cheaply clonable handler table shared by every
/// connection that dispatches against it.
#[derive(Clone)]
pub struct SharedHandlers(Arc<Handlers>);

impl SharedHandlers {
    /// An empty table; every envelope is ignored.
    pub fn empty() -> Self {
        Handlers::new().freeze()
    }

    /// Runs every handler registered for the envelope's tag, in
    /// registration order, each over a fresh payload cursor.
    ///
    /// Unknown tags are ignored. A handler error is contained to that
    /// handler: it is logged and the remaining handlers still run.
    pub fn dispatch(&self, client: &Arc<dyn Client>, msg: &GameMsg) {
        let Some(handlers) = self.0.map.get(&msg.tag()) else {
            trace!(tag = msg.tag(), "no handler for tag, dropping");
            return;
        };
        for handler in handlers {
            let mut reader = msg.reader();
            if let Err(err) = handler(client, &mut reader) {
                warn!(tag = msg.tag(), %err, "message handler failed");
            }
        }
    }

    pub fn has_tag(&self, tag: u8) -> bool {
        self.0.map.contains_key(&tag)
    }
}

//! In-process paired transport
//!
//! Two [`LocalClient`] instances are wired directly to each other:
//! sending on one delivers to the other with no sockets, framing, or
//! compression involved. The single-player and listen-server cases run
//! through the exact same [`Client`] surface as networked play.

use crate::handlers::{Handlers, SharedHandlers};
use crate::{Client, ClientKey};
use lanlink_protocol::{ContextRunner, GameMsg, MsgTag};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

/// One half of an in-process pair.
///
/// Holds a weak reference to its partner: dropping one half never keeps
/// the other alive, and sends after the partner is gone are dropped.
pub struct LocalClient {
    key: ClientKey,
    id: AtomicU32,
    handlers: SharedHandlers,
    ctx: Arc<dyn ContextRunner>,
    partner: Mutex<Option<Weak<LocalClient>>>,
}

impl LocalClient {
    /// Builds a wired pair. Each side gets its own handler table, with
    /// the identity-assignment handshake appended: a Connect envelope
    /// delivered to either side stores the identity it carries.
    pub fn pair(
        handlers_a: Handlers,
        handlers_b: Handlers,
        ctx: Arc<dyn ContextRunner>,
    ) -> (Arc<LocalClient>, Arc<LocalClient>) {
        let a = Self::from_shared(Self::client_table(handlers_a), ctx.clone());
        let b = Self::from_shared(Self::client_table(handlers_b), ctx);
        Self::attach(&a, &b);
        (a, b)
    }

    /// Builds one unwired half over an already-frozen table. The caller
    /// wires it with [`LocalClient::attach`]. Used by the server, whose
    /// table is shared across every client and already carries the
    /// baseline handlers.
    pub fn from_shared(handlers: SharedHandlers, ctx: Arc<dyn ContextRunner>) -> Arc<LocalClient> {
        Arc::new(LocalClient {
            key: ClientKey::next(),
            id: AtomicU32::new(0),
            handlers,
            ctx,
            partner: Mutex::new(None),
        })
    }

    /// Cross-links two halves.
    pub fn attach(a: &Arc<LocalClient>, b: &Arc<LocalClient>) {
        *a.partner.lock().unwrap() = Some(Arc::downgrade(b));
        *b.partner.lock().unwrap() = Some(Arc::downgrade(a));
    }

    /// Freezes an application table with the identity handshake
    /// appended, the client-side table shape both transports use.
    pub fn client_table(mut handlers: Handlers) -> SharedHandlers {
        handlers.on(MsgTag::Connect.tag(), |client, reader| {
            client.set_id(reader.read_i32()? as u32);
            Ok(())
        });
        handlers.freeze()
    }

    /// Schedules dispatch of `msg` on this half's consumer context.
    fn deliver(self: &Arc<Self>, msg: GameMsg) {
        let me = self.clone();
        self.ctx.run(Box::new(move || {
            let as_client: Arc<dyn Client> = me.clone();
            me.handlers.dispatch(&as_client, &msg);
            if msg.tag() == MsgTag::Disconnect.tag() {
                me.close();
            }
        }));
    }
}

impl Client for LocalClient {
    fn key(&self) -> ClientKey {
        self.key
    }

    fn id(&self) -> u32 {
        self.id.load(Ordering::SeqCst)
    }

    fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::SeqCst);
    }

    fn send(&self, msg: GameMsg) {
        // Capture the partner at send time: a later close on this side
        // must not revoke deliveries already made.
        let partner = self.partner.lock().unwrap().as_ref().and_then(Weak::upgrade);
        match partner {
            Some(partner) => {
                trace!(key = %self.key, tag = msg.tag(), "local deliver");
                partner.deliver(msg);
            }
            None => debug!(key = %self.key, "send with no partner, dropping"),
        }
    }

    fn close(&self) {
        self.partner.lock().unwrap().take();
    }

    fn disconnect(&self) {
        self.send(GameMsg::disconnect());
        self.close();
    }
}

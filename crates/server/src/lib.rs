//! # Lanlink Server
//!
//! The session host: a TCP accept loop that wraps each inbound
//! connection in an accepted-side client, assigns monotonically
//! increasing identities, and keeps the [`ClientRegistry`] consistent
//! through connects, reconnect takeovers, and disconnects. One handler
//! table is shared by every connection; the framework's baseline
//! handlers run before anything the application registered.

pub mod registry;

pub use registry::ClientRegistry;

use lanlink_client::{Client, Handlers, LocalClient, RemoteClient, SharedHandlers};
use lanlink_protocol::{CancelToken, ContextRunner, GameMsg, MsgTag, NetConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already started")]
    AlreadyStarted,
}

/// Hosts one session.
///
/// Created stopped; [`GameServer::start`] binds the listener and
/// [`GameServer::stop`] returns it to the created state (registry
/// empty, identity counter reset), so a server can be started again.
pub struct GameServer {
    config: NetConfig,
    ctx: Arc<dyn ContextRunner>,
    handlers: SharedHandlers,
    registry: Arc<Mutex<ClientRegistry>>,
    next_id: Arc<AtomicU32>,
    cancel: Mutex<Option<CancelToken>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl GameServer {
    /// Builds the server around the application's handler table. The
    /// baseline Connect/Reconnect/Disconnect handlers are installed
    /// first; application handlers for the same tags run after them.
    pub fn new(config: NetConfig, app_handlers: Handlers, ctx: Arc<dyn ContextRunner>) -> Self {
        let registry = Arc::new(Mutex::new(ClientRegistry::new()));
        let mut table = Self::baseline_handlers(registry.clone());
        table.extend(app_handlers);
        Self {
            config,
            ctx,
            handlers: table.freeze(),
            registry,
            next_id: Arc::new(AtomicU32::new(0)),
            cancel: Mutex::new(None),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    fn baseline_handlers(registry: Arc<Mutex<ClientRegistry>>) -> Handlers {
        let mut handlers = Handlers::new();

        handlers.on(MsgTag::Connect.tag(), |client, reader| {
            let label = reader.read_str()?;
            info!(id = client.id(), %label, "client introduced itself");
            client.send(GameMsg::connect_ack(client.id()));
            Ok(())
        });

        let reg = registry.clone();
        handlers.on(MsgTag::Reconnect.tag(), move |client, reader| {
            let claimed = reader.read_i32()? as u32;
            let stale = {
                let mut reg = reg.lock().unwrap();
                let stale = reg
                    .get(claimed)
                    .filter(|held| held.key() != client.key())
                    .cloned();
                reg.add(client.clone(), claimed);
                stale
            };
            if let Some(stale) = stale {
                info!(id = claimed, "evicting stale holder for reconnect");
                stale.disconnect();
            }
            client.set_id(claimed);
            client.send(GameMsg::reconnect(claimed));
            Ok(())
        });

        let reg = registry;
        handlers.on(MsgTag::Disconnect.tag(), move |client, _reader| {
            info!(id = client.id(), "client disconnected");
            reg.lock().unwrap().remove(client.key());
            Ok(())
        });

        handlers
    }

    /// Binds the listener and spawns the accept loop. Returns the
    /// bound address (`config.tcp_port` 0 binds an ephemeral port).
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.is_started() {
            return Err(ServerError::AlreadyStarted);
        }
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.tcp_port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "server listening");
        *self.local_addr.lock().unwrap() = Some(addr);

        let token = CancelToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());
        let task = tokio::spawn(Self::accept_loop(
            listener,
            token,
            self.handlers.clone(),
            self.ctx.clone(),
            self.config.clone(),
            self.registry.clone(),
            self.next_id.clone(),
        ));
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(addr)
    }

    async fn accept_loop(
        listener: TcpListener,
        token: CancelToken,
        handlers: SharedHandlers,
        ctx: Arc<dyn ContextRunner>,
        config: NetConfig,
        registry: Arc<Mutex<ClientRegistry>>,
        next_id: Arc<AtomicU32>,
    ) {
        loop {
            let stream = tokio::select! {
                _ = token.cancelled() => return,
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        debug!(%peer, "inbound connection");
                        stream
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                        tokio::time::sleep(config.accept_poll).await;
                        continue;
                    }
                },
            };
            // Identity is fixed before the connection tasks start, so
            // even an immediate Connect frame is answered with it.
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            match RemoteClient::accepted(stream, id, handlers.clone(), ctx.clone(), config.clone())
            {
                Ok(client) => {
                    registry
                        .lock()
                        .unwrap()
                        .add(client.clone() as Arc<dyn Client>, id);
                    info!(id, peer = %client.peer_addr(), "client connected");
                }
                Err(err) => warn!(%err, "failed to adopt connection"),
            }
        }
    }

    /// Enqueues `msg` to every registered client. Ordering holds per
    /// recipient, never across recipients.
    pub fn send_all(&self, msg: &GameMsg) {
        let handles = self.registry.lock().unwrap().handles();
        for client in handles {
            client.send(msg.clone());
        }
    }

    /// Registers an in-process client and hands back the application's
    /// half. The host's own player joins through here; its Connect
    /// flows through the same baseline handshake as a networked one.
    pub fn local_client(&self, app_handlers: Handlers) -> Arc<LocalClient> {
        let server_half = LocalClient::from_shared(self.handlers.clone(), self.ctx.clone());
        let app_half =
            LocalClient::from_shared(LocalClient::client_table(app_handlers), self.ctx.clone());
        LocalClient::attach(&server_half, &app_half);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        server_half.set_id(id);
        self.registry
            .lock()
            .unwrap()
            .add(server_half as Arc<dyn Client>, id);
        info!(id, "local client attached");
        app_half
    }

    /// Stops the accept loop and disconnects every client. Safe to
    /// call repeatedly or on a server that never started.
    pub async fn stop(&self) {
        let token = self.cancel.lock().unwrap().take();
        let task = self.accept_task.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(mut task) = task {
            if timeout(self.config.close_wait, &mut task).await.is_err() {
                warn!("accept loop did not exit in time, aborting");
                task.abort();
            }
        }
        let handles = {
            let mut registry = self.registry.lock().unwrap();
            let handles = registry.handles();
            registry.clear();
            handles
        };
        for client in &handles {
            client.disconnect();
        }
        self.next_id.store(0, Ordering::SeqCst);
        *self.local_addr.lock().unwrap() = None;
        if !handles.is_empty() {
            info!(dropped = handles.len(), "server stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.cancel.lock().unwrap().is_some()
    }

    /// Bound listener address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().unwrap().count()
    }

    /// Handle registered under `id`, if any.
    pub fn client(&self, id: u32) -> Option<Arc<dyn Client>> {
        self.registry.lock().unwrap().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlink_protocol::{Compression, MsgWriter, SpawnRunner, TaskQueue, USER_TAGS_START};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config() -> NetConfig {
        NetConfig {
            tcp_port: 0,
            write_poll: Duration::from_millis(5),
            ..NetConfig::default()
        }
    }

    async fn read_frame(stream: &mut TcpStream) -> GameMsg {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        GameMsg::from_bytes(Compression::None.decompress(&payload).unwrap()).unwrap()
    }

    async fn write_frame(stream: &mut TcpStream, msg: &GameMsg) {
        stream
            .write_all(&(msg.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(msg.as_bytes()).await.unwrap();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_connect_handshake_returns_assigned_identity() {
        let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
        let addr = server.start().await.unwrap();

        let mut first = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        write_frame(&mut first, &GameMsg::connect("alpha")).await;
        let ack = read_frame(&mut first).await;
        assert_eq!(ack.tag(), MsgTag::Connect.tag());
        assert_eq!(ack.reader().read_i32().unwrap(), 0);

        let mut second = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        write_frame(&mut second, &GameMsg::connect("beta")).await;
        let ack = read_frame(&mut second).await;
        assert_eq!(ack.reader().read_i32().unwrap(), 1);

        wait_until(|| server.client_count() == 2).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_application_handlers_run_after_baseline() {
        let echoes = Arc::new(Mutex::new(Vec::new()));
        let mut app = Handlers::new();
        let sink = echoes.clone();
        app.on(USER_TAGS_START, move |_c, r| {
            sink.lock().unwrap().push(r.read_str()?);
            Ok(())
        });

        let server = GameServer::new(test_config(), app, Arc::new(SpawnRunner::new()));
        let addr = server.start().await.unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let mut w = MsgWriter::new(USER_TAGS_START);
        w.put_str("hello host");
        write_frame(&mut conn, &w.finish()).await;

        wait_until(|| !echoes.lock().unwrap().is_empty()).await;
        assert_eq!(*echoes.lock().unwrap(), vec!["hello host"]);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_empties_registry() {
        let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
        let addr = server.start().await.unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        write_frame(&mut conn, &GameMsg::connect("loner")).await;
        read_frame(&mut conn).await;
        wait_until(|| server.client_count() == 1).await;

        write_frame(&mut conn, &GameMsg::disconnect()).await;
        wait_until(|| server.client_count() == 0).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_local_client_joins_the_registry() {
        let queue = TaskQueue::new();
        let server = GameServer::new(test_config(), Handlers::new(), Arc::new(queue.clone()));

        let player = server.local_client(Handlers::new());
        assert_eq!(server.client_count(), 1);

        player.send_connect("host player");
        queue.pump(); // server half handles Connect, replies
        queue.pump(); // app half handles the reply
        assert_eq!(player.id(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_safe_when_never_started() {
        let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
        server.stop().await;
        assert!(!server.is_started());

        let addr = server.start().await.unwrap();
        assert!(server.is_started());
        assert_eq!(server.local_addr(), Some(addr));
        server.stop().await;
        server.stop().await;
        assert!(!server.is_started());
        assert_eq!(server.local_addr(), None);

        // A stopped server can be started again.
        server.start().await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyStarted)
        ));
        server.stop().await;
    }
}

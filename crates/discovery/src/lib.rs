//! # Lanlink Discovery
//!
//! Session discovery over UDP broadcast. A host periodically sends its
//! advertisement text to the broadcast address; listeners keep a
//! directory of sender address → last-seen text and notify the
//! application when an entry appears or its text changes. Repeat
//! identical datagrams from a known address are absorbed silently.
//!
//! Discovery is fully decoupled from the stream protocol: the
//! advertisement is plain text, not an envelope, and losing datagrams
//! only delays the directory, never corrupts it.

use lanlink_protocol::{CancelToken, ContextRunner, NetConfig};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 512;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

type ChangedCallback = Arc<dyn Fn() + Send + Sync>;

/// Host and/or listener for session discovery. The two roles share a
/// lifetime: [`Discovery::stop`] ends whichever are running.
pub struct Discovery {
    config: NetConfig,
    ctx: Arc<dyn ContextRunner>,
    on_changed: Option<ChangedCallback>,
    directory: Arc<Mutex<HashMap<IpAddr, String>>>,
    cancel: Mutex<Option<CancelToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listener_addr: Mutex<Option<SocketAddr>>,
}

impl Discovery {
    pub fn new(config: NetConfig, ctx: Arc<dyn ContextRunner>) -> Self {
        Self {
            config,
            ctx,
            on_changed: None,
            directory: Arc::new(Mutex::new(HashMap::new())),
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            listener_addr: Mutex::new(None),
        }
    }

    /// Registers the directory-changed callback. Set before starting
    /// the listener; it runs on the consumer context.
    pub fn on_changed(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_changed = Some(Arc::new(callback));
    }

    /// Starts advertising this host. The advertisement text goes to
    /// the broadcast address every `advertise_interval` until stop.
    pub async fn start_host(&self) -> Result<(), DiscoveryError> {
        let socket = Self::bind_broadcast().await?;
        let token = self.token();
        let config = self.config.clone();
        let handle = tokio::spawn(Self::broadcast_loop(socket, config, token));
        self.tasks.lock().unwrap().push(handle);
        Ok(())
    }

    /// Starts listening for advertisements. Returns the bound address
    /// (`config.discovery_port` 0 binds an ephemeral port).
    pub async fn start_listener(&self) -> Result<SocketAddr, DiscoveryError> {
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.discovery_port)).await?;
        let addr = socket.local_addr()?;
        info!(%addr, "discovery listener bound");
        *self.listener_addr.lock().unwrap() = Some(addr);

        let token = self.token();
        let handle = tokio::spawn(Self::listen_loop(
            socket,
            self.config.clone(),
            token,
            self.directory.clone(),
            self.ctx.clone(),
            self.on_changed.clone(),
        ));
        self.tasks.lock().unwrap().push(handle);
        Ok(addr)
    }

    /// Snapshot of the directory: sender address → last-seen text.
    pub fn hosts(&self) -> HashMap<IpAddr, String> {
        self.directory.lock().unwrap().clone()
    }

    /// Address the listener is bound to while running.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        *self.listener_addr.lock().unwrap()
    }

    /// Ends both roles and clears the directory. Safe to call
    /// repeatedly or when nothing was started.
    pub async fn stop(&self) {
        if let Some(token) = self.cancel.lock().unwrap().take() {
            token.cancel();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for mut task in tasks {
            if timeout(self.config.close_wait, &mut task).await.is_err() {
                warn!("discovery task did not exit in time, aborting");
                task.abort();
            }
        }
        self.directory.lock().unwrap().clear();
        *self.listener_addr.lock().unwrap() = None;
    }

    /// Token shared by every running role; created on first start.
    fn token(&self) -> CancelToken {
        self.cancel
            .lock()
            .unwrap()
            .get_or_insert_with(CancelToken::new)
            .clone()
    }

    async fn bind_broadcast() -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        Ok(socket)
    }

    async fn broadcast_loop(mut socket: UdpSocket, config: NetConfig, token: CancelToken) {
        let target = (Ipv4Addr::BROADCAST, config.discovery_port);
        debug!(port = config.discovery_port, "advertising session");
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(config.advertise_interval) => {}
            }
            if let Err(err) = socket
                .send_to(config.advertisement.as_bytes(), target)
                .await
            {
                warn!(%err, "advertisement send failed, reopening socket");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(config.reopen_delay) => {}
                }
                match Self::bind_broadcast().await {
                    Ok(reopened) => socket = reopened,
                    Err(err) => warn!(%err, "could not reopen discovery socket"),
                }
            }
        }
    }

    async fn listen_loop(
        mut socket: UdpSocket,
        config: NetConfig,
        token: CancelToken,
        directory: Arc<Mutex<HashMap<IpAddr, String>>>,
        ctx: Arc<dyn ContextRunner>,
        on_changed: Option<ChangedCallback>,
    ) {
        let port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(_) => config.discovery_port,
        };
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = tokio::select! {
                _ = token.cancelled() => return,
                res = socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(%err, "discovery recv failed, reopening socket");
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = tokio::time::sleep(config.reopen_delay) => {}
                        }
                        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                            Ok(reopened) => socket = reopened,
                            Err(err) => warn!(%err, "could not reopen discovery socket"),
                        }
                        continue;
                    }
                },
            };
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            let changed = {
                let mut directory = directory.lock().unwrap();
                match directory.get(&from.ip()) {
                    Some(existing) if *existing == text => false,
                    _ => {
                        directory.insert(from.ip(), text.clone());
                        true
                    }
                }
            };
            if changed {
                debug!(ip = %from.ip(), %text, "session directory updated");
                if let Some(callback) = &on_changed {
                    let callback = callback.clone();
                    ctx.run(Box::new(move || callback()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlink_protocol::SpawnRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> NetConfig {
        NetConfig {
            discovery_port: 0,
            advertise_interval: Duration::from_millis(50),
            ..NetConfig::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn send_to_listener(addr: SocketAddr, text: &str) {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(text.as_bytes(), ("127.0.0.1", addr.port()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_records_and_notifies_once_per_change() {
        let notifications = Arc::new(AtomicUsize::new(0));
        let mut discovery = Discovery::new(test_config(), Arc::new(SpawnRunner::new()));
        let count = notifications.clone();
        discovery.on_changed(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let addr = discovery.start_listener().await.unwrap();

        send_to_listener(addr, "New Game").await;
        wait_until(|| notifications.load(Ordering::SeqCst) == 1).await;
        let hosts = discovery.hosts();
        assert_eq!(hosts.values().next().unwrap(), "New Game");

        // The same text from the same host is absorbed silently.
        send_to_listener(addr, "New Game").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        // A changed text notifies again.
        send_to_listener(addr, "Game Of Dave").await;
        wait_until(|| notifications.load(Ordering::SeqCst) == 2).await;
        assert_eq!(discovery.hosts().values().next().unwrap(), "Game Of Dave");

        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_directory_and_is_idempotent() {
        let discovery = Discovery::new(test_config(), Arc::new(SpawnRunner::new()));
        discovery.stop().await; // never started

        let addr = discovery.start_listener().await.unwrap();
        send_to_listener(addr, "New Game").await;
        wait_until(|| !discovery.hosts().is_empty()).await;

        discovery.stop().await;
        assert!(discovery.hosts().is_empty());
        assert_eq!(discovery.listener_addr(), None);
        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_host_role_starts_and_stops_cleanly() {
        let config = NetConfig {
            discovery_port: 40405,
            ..test_config()
        };
        let discovery = Discovery::new(config, Arc::new(SpawnRunner::new()));
        discovery.start_host().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        discovery.stop().await;
    }
}

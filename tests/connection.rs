//! End-to-end connection lifecycle over real sockets.

use lanlink::client::{Client, Handlers, RemoteClient};
use lanlink::protocol::{GameMsg, MsgWriter, NetConfig, SpawnRunner, USER_TAGS_START};
use lanlink::server::GameServer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_config() -> NetConfig {
    NetConfig {
        tcp_port: 0,
        write_poll: Duration::from_millis(5),
        ..NetConfig::default()
    }
}

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn chat(text: &str) -> GameMsg {
    let mut w = MsgWriter::new(USER_TAGS_START);
    w.put_str(text);
    w.finish()
}

#[tokio::test]
async fn test_clients_receive_sequential_identities() {
    init_tracing();
    let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
    let addr = server.start().await.unwrap();

    let first = RemoteClient::connect(
        loopback(addr),
        Handlers::new(),
        Arc::new(SpawnRunner::new()),
        test_config(),
    )
    .await
    .unwrap();
    first.send_connect("first");
    wait_until(|| server.client_count() == 1).await;

    let second = RemoteClient::connect(
        loopback(addr),
        Handlers::new(),
        Arc::new(SpawnRunner::new()),
        test_config(),
    )
    .await
    .unwrap();
    second.send_connect("second");

    wait_until(|| second.id() == 1).await;
    assert_eq!(first.id(), 0);
    assert_eq!(server.client_count(), 2);
    server.stop().await;
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    init_tracing();
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut app = Handlers::new();
    let sink = received.clone();
    app.on(USER_TAGS_START, move |_c, r| {
        sink.lock().unwrap().push(r.read_str()?);
        Ok(())
    });

    let server = GameServer::new(test_config(), app, Arc::new(SpawnRunner::new()));
    let addr = server.start().await.unwrap();

    let client = RemoteClient::connect(
        loopback(addr),
        Handlers::new(),
        Arc::new(SpawnRunner::new()),
        test_config(),
    )
    .await
    .unwrap();
    let sent: Vec<String> = (0..20).map(|i| format!("move {i}")).collect();
    for text in &sent {
        client.send(chat(text));
    }

    wait_until(|| received.lock().unwrap().len() == sent.len()).await;
    assert_eq!(*received.lock().unwrap(), sent);
    server.stop().await;
}

#[tokio::test]
async fn test_graceful_disconnect_empties_registry_without_reconnect() {
    init_tracing();
    let server = GameServer::new(test_config(), Handlers::new(), Arc::new(SpawnRunner::new()));
    let addr = server.start().await.unwrap();

    let client = RemoteClient::connect(
        loopback(addr),
        Handlers::new(),
        Arc::new(SpawnRunner::new()),
        test_config(),
    )
    .await
    .unwrap();
    client.send_connect("fleeting");
    wait_until(|| server.client_count() == 1).await;

    client.disconnect();
    wait_until(|| server.client_count() == 0).await;

    // No reconnect attempt shows up afterwards.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.client_count(), 0);
    server.stop().await;
}

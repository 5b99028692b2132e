//! Integration tests for the gateway and game host
//!
//! Each test runs a real game host and a real gateway on loopback sockets
//! and talks to them through the protocol client.

use client::{ClientError, GatewayClient};
use game::server::{self, MAILBOX_SIZE};
use game::Registry;
use gateway::config::Config;
use gateway::listener;
use gateway::{GatewayContext, ServicePool, ShutdownCoordinator};
use shared::proto::{
    AutoId, Empty, UserLoginInfo, HEART_BEAT_ACK, HEART_BEAT_REQ, PROTO_PING_ACK,
    PROTO_PING_REQ, USER_LOGOUT_ACK, USER_LOGOUT_REQ,
};
use shared::{encode, RelayFrame, Unpack};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

struct Deployment {
    gateway: SocketAddr,
    registry: Registry,
    shutdown: ShutdownCoordinator,
}

async fn deploy(config: Config, with_host: bool) -> Deployment {
    let services = Arc::new(ServicePool::new());
    let registry = Registry::new();

    if with_host {
        let host = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let key = format!("{}/game1", config.game_service_path());
        services.add_service(&key, host.local_addr().unwrap()).await;
        tokio::spawn(server::serve(host, registry.clone(), MAILBOX_SIZE));
    }

    let shutdown = ShutdownCoordinator::new();
    let edge = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway = edge.local_addr().unwrap();
    let ctx = GatewayContext::new(config, services, shutdown.clone());
    tokio::spawn(listener::run_tcp(edge, ctx));

    Deployment {
        gateway,
        registry,
        shutdown,
    }
}

fn test_config() -> Config {
    Config {
        relay_keepalive: None,
        ..Config::default()
    }
}

fn login_info() -> UserLoginInfo {
    UserLoginInfo {
        open_udid: "integration".to_string(),
        client_version: 1,
        device_name: "tests".to_string(),
        ..UserLoginInfo::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Reads until the gateway closes the connection
async fn expect_closed(client: &mut GatewayClient<TcpStream>) {
    let result = timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("connection still open");
    assert!(matches!(result, Err(ClientError::Io(_))), "got {:?}", result);
}

/// END TO END TESTS
mod relay_tests {
    use super::*;

    /// Handshake with seeds (7, 11), login, then a backend push reaching the
    /// client through the encrypted channel
    #[tokio::test]
    async fn handshake_login_and_backend_push() {
        let deployment = deploy(
            Config {
                relay_keepalive: Some(Duration::from_millis(20)),
                ..Config::default()
            },
            true,
        )
        .await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();

        client.exchange_keys(7, 11).await.unwrap();
        assert!(client.is_encrypted());

        let player_id = client.login(&login_info()).await.unwrap();
        assert_eq!(player_id, 1);

        let registry = deployment.registry.clone();
        eventually(|| registry.query(player_id).is_some()).await;
        assert_eq!(deployment.registry.count(), 1);

        // keepalive pings stay between gateway and host
        sleep(Duration::from_millis(100)).await;

        let push = encode(PROTO_PING_REQ, Some(&AutoId { id: 1234 }));
        deployment
            .registry
            .push(player_id, RelayFrame::Message(push))
            .unwrap();

        let reply = client.recv().await.unwrap();
        assert_eq!(reply.id, PROTO_PING_REQ);
        assert_eq!(AutoId::unpack(&mut reply.reader()).unwrap().id, 1234);
    }

    /// Relay-range requests are answered by the game host
    #[tokio::test]
    async fn relay_request_round_trip() {
        let deployment = deploy(test_config(), true).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        client.exchange_random_keys().await.unwrap();
        client.login(&login_info()).await.unwrap();

        for id in 0..5 {
            client
                .send(PROTO_PING_REQ, Some(&AutoId { id }))
                .await
                .unwrap();
            let echo: AutoId = client.recv().await.unwrap().expect(PROTO_PING_ACK).unwrap();
            assert_eq!(echo.id, id);
        }

        client
            .send(HEART_BEAT_REQ, Some(&AutoId { id: 3 }))
            .await
            .unwrap();
        let beat: AutoId = client.recv().await.unwrap().expect(HEART_BEAT_ACK).unwrap();
        assert_eq!(beat.id, 3);
    }

    /// Logout is acknowledged, then the host kicks and the gateway closes
    #[tokio::test]
    async fn logout_kicks_session() {
        let deployment = deploy(test_config(), true).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        client.exchange_random_keys().await.unwrap();
        let player_id = client.login(&login_info()).await.unwrap();

        client.send(USER_LOGOUT_REQ, Some(&Empty)).await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply.id, USER_LOGOUT_ACK);

        expect_closed(&mut client).await;
        let registry = deployment.registry.clone();
        eventually(|| registry.query(player_id).is_none()).await;
    }

    /// Client disconnect closes the relay stream and clears the registry
    #[tokio::test]
    async fn client_disconnect_unregisters_player() {
        let deployment = deploy(test_config(), true).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        client.exchange_random_keys().await.unwrap();
        client.login(&login_info()).await.unwrap();

        let registry = deployment.registry.clone();
        eventually(|| registry.count() == 1).await;

        drop(client);
        eventually(|| registry.count() == 0).await;
    }
}

/// PROTOCOL VIOLATION TESTS
mod violation_tests {
    use super::*;

    /// Sequences 0, 1, 2 are accepted and 4 closes the connection
    #[tokio::test]
    async fn sequence_gap_disconnects() {
        let deployment = deploy(test_config(), false).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();

        for id in 0..3 {
            client
                .send(HEART_BEAT_REQ, Some(&AutoId { id }))
                .await
                .unwrap();
            let beat: AutoId = client.recv().await.unwrap().expect(HEART_BEAT_ACK).unwrap();
            assert_eq!(beat.id, id);
        }
        assert_eq!(client.sequence(), 3);

        let beat = encode(HEART_BEAT_REQ, Some(&AutoId { id: 4 }));
        client.send_stamped(4, &beat).await.unwrap();
        expect_closed(&mut client).await;
    }

    /// Ids in the local range without a handler are fatal
    #[tokio::test]
    async fn unknown_local_message_disconnects() {
        let deployment = deploy(test_config(), false).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();

        client.send(500, Some(&Empty)).await.unwrap();
        expect_closed(&mut client).await;
    }

    /// Login needs a game host; without one the session ends
    #[tokio::test]
    async fn login_without_game_host_disconnects() {
        let deployment = deploy(test_config(), false).await;
        let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        client.exchange_random_keys().await.unwrap();

        assert!(client.login(&login_info()).await.is_err());
    }

    /// With plaintext disabled only the seed exchange may come first
    #[tokio::test]
    async fn plaintext_rejected_when_encryption_required() {
        let config = Config {
            allow_plaintext: false,
            ..test_config()
        };
        let deployment = deploy(config, false).await;

        let mut encrypted = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        encrypted.exchange_random_keys().await.unwrap();
        encrypted
            .send(HEART_BEAT_REQ, Some(&AutoId { id: 1 }))
            .await
            .unwrap();
        assert_eq!(encrypted.recv().await.unwrap().id, HEART_BEAT_ACK);

        let mut plain = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
        plain
            .send(HEART_BEAT_REQ, Some(&AutoId { id: 1 }))
            .await
            .unwrap();
        expect_closed(&mut plain).await;
    }
}

/// SHUTDOWN TESTS
mod shutdown_tests {
    use super::*;

    /// Triggering twice closes every session once and the drain completes
    #[tokio::test]
    async fn double_trigger_drains_all_sessions() {
        let deployment = deploy(test_config(), true).await;

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut client = GatewayClient::connect_tcp(deployment.gateway).await.unwrap();
            client.exchange_random_keys().await.unwrap();
            client.login(&login_info()).await.unwrap();
            clients.push(client);
        }
        let registry = deployment.registry.clone();
        eventually(|| registry.count() == 3).await;

        deployment.shutdown.trigger();
        deployment.shutdown.trigger();
        timeout(Duration::from_secs(5), deployment.shutdown.wait())
            .await
            .expect("sessions did not drain");
        assert_eq!(deployment.shutdown.outstanding(), 0);

        for client in clients.iter_mut() {
            expect_closed(client).await;
        }
        eventually(|| registry.count() == 0).await;

        // new connections are no longer served
        let late = TcpStream::connect(deployment.gateway).await;
        if let Ok(stream) = late {
            let mut client = GatewayClient::new(stream);
            let _ = client.send(HEART_BEAT_REQ, Some(&AutoId { id: 1 })).await;
            assert!(timeout(Duration::from_millis(200), client.recv())
                .await
                .map(|r| r.is_err())
                .unwrap_or(true));
        }
    }
}

/// KCP TRANSPORT TESTS
mod transport_tests {
    use super::*;
    use gateway::listener::kcp_config;
    use tokio_kcp::KcpListener;

    /// The UDP-reliable listener serves the same protocol as TCP
    #[tokio::test]
    async fn kcp_key_exchange_and_heartbeat() {
        let shutdown = ShutdownCoordinator::new();
        let ctx = GatewayContext::new(test_config(), Arc::new(ServicePool::new()), shutdown.clone());
        let edge = KcpListener::bind(kcp_config(), "127.0.0.1:0").await.unwrap();
        let gateway = edge.local_addr().unwrap();
        let accept = tokio::spawn(listener::run_kcp(edge, ctx));

        let mut client = GatewayClient::connect_kcp(gateway).await.unwrap();
        timeout(Duration::from_secs(5), client.exchange_keys(7, 11))
            .await
            .expect("key exchange over KCP timed out")
            .unwrap();
        assert!(client.is_encrypted());

        for id in 0..3 {
            client
                .send(HEART_BEAT_REQ, Some(&AutoId { id }))
                .await
                .unwrap();
            let reply = timeout(Duration::from_secs(5), client.recv())
                .await
                .expect("heartbeat over KCP timed out")
                .unwrap();
            let beat: AutoId = reply.expect(HEART_BEAT_ACK).unwrap();
            assert_eq!(beat.id, id);
        }

        shutdown.trigger();
        accept.await.unwrap();
        timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .expect("KCP session did not drain");
    }
}

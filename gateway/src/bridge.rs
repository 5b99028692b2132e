//! Forwarding bridge: the one relay stream a session holds to a game host
//!
//! The session loop owns the send half and forwards relay-range frames on
//! it. A pump task owns the receive half and feeds whatever the game host
//! pushes into the session mailbox, so backend traffic reaches the client
//! through the same loop, and therefore in the same order, as local replies.

use crate::context::GatewayContext;
use crate::error::SessionError;
use crate::session::{Session, SessionFlags};
use log::{debug, info, warn};
use shared::relay::{self, RelayReceiver};
use shared::{RelayFrame, StreamMetadata};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Resolves a game host, opens the player's relay stream and starts the pump.
///
/// A session opens at most one stream for its whole lifetime; there is no
/// reconnect after failure.
pub async fn open(
    session: &mut Session,
    ctx: &GatewayContext,
    player_id: i32,
) -> Result<(), SessionError> {
    let path = ctx.config.game_service_path();
    let endpoint = match &ctx.config.game_host_id {
        Some(host_id) => ctx.services.get_service_with_id(&path, host_id).await,
        None => ctx.services.get_service(&path).await,
    }
    .ok_or_else(|| SessionError::NoBackendHost(path.clone()))?;

    let (sender, receiver) =
        relay::open_stream(endpoint.addr, &StreamMetadata::for_player(player_id)).await?;
    info!(
        "relay stream for player {} opened to {} ({})",
        player_id,
        endpoint.id(),
        endpoint.addr
    );

    session.attach_backend(sender, endpoint.id().to_string());
    ctx.shutdown.spawn(pump(
        receiver,
        session.mailbox(),
        session.flags().clone(),
        session.die().clone(),
        player_id,
    ));
    Ok(())
}

/// Sends a relay-range payload (message id included) to the game host
pub async fn forward(session: &mut Session, payload: Vec<u8>) -> Result<(), SessionError> {
    let sender = session
        .backend_mut()
        .ok_or(SessionError::NoBackendStream)?;
    sender.send(&RelayFrame::Message(payload)).await?;
    Ok(())
}

/// Sends a liveness probe; a no-op before login
pub async fn keepalive(session: &mut Session) -> Result<(), SessionError> {
    if let Some(sender) = session.backend_mut() {
        sender.send(&RelayFrame::Ping(ping_payload())).await?;
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Millisecond timestamp carried by a relay ping
pub fn ping_payload() -> Vec<u8> {
    now_millis().to_be_bytes().to_vec()
}

/// Round trip of an echoed ping, if the payload is one of ours
pub fn ping_rtt(payload: &[u8]) -> Option<Duration> {
    let stamp: [u8; 8] = payload.try_into().ok()?;
    let sent = u64::from_be_bytes(stamp);
    Some(Duration::from_millis(now_millis().saturating_sub(sent)))
}

/// Moves frames from the game host into the session mailbox.
///
/// Stream end and stream errors are delivered as a `Kick` behind whatever
/// was already queued, so the client still gets the frames sent before the
/// host went away.
async fn pump(
    mut receiver: RelayReceiver,
    mailbox: mpsc::Sender<RelayFrame>,
    flags: SessionFlags,
    die: CancellationToken,
    player_id: i32,
) {
    loop {
        let frame = tokio::select! {
            frame = receiver.recv() => frame,
            _ = die.cancelled() => return,
        };

        let frame = match frame {
            Ok(Some(RelayFrame::Ping(payload))) => {
                match ping_rtt(&payload) {
                    Some(rtt) => debug!("relay ping for player {}: {:?}", player_id, rtt),
                    None => debug!("relay ping for player {} with foreign payload", player_id),
                }
                continue;
            }
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("game host closed relay stream of player {}", player_id);
                RelayFrame::Kick
            }
            Err(e) => {
                warn!("relay stream of player {} failed: {}", player_id, e);
                RelayFrame::Kick
            }
        };

        let last = frame == RelayFrame::Kick;
        let delivered = tokio::select! {
            result = mailbox.send(frame) => result.is_ok(),
            _ = die.cancelled() => return,
        };
        if !delivered {
            // session loop already gone
            flags.kick();
            die.cancel();
            return;
        }
        if last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::ServicePool;
    use crate::session::tests::test_session;
    use crate::shutdown::ShutdownCoordinator;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn context(services: Arc<ServicePool>, pinned: Option<&str>) -> Arc<GatewayContext> {
        let config = Config {
            game_host_id: pinned.map(str::to_string),
            ..Config::default()
        };
        GatewayContext::new(config, services, ShutdownCoordinator::new())
    }

    #[test]
    fn test_ping_rtt() {
        let rtt = ping_rtt(&ping_payload()).unwrap();
        assert!(rtt < Duration::from_secs(5));
        assert!(ping_rtt(b"abc").is_none());
    }

    #[tokio::test]
    async fn test_forward_without_stream() {
        let (mut session, _rx) = test_session();
        assert!(matches!(
            forward(&mut session, vec![3, 233]).await,
            Err(SessionError::NoBackendStream)
        ));
        // keepalive before login is harmless
        assert!(keepalive(&mut session).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_without_hosts() {
        let (mut session, _rx) = test_session();
        let ctx = context(Arc::new(ServicePool::new()), None);
        let err = open(&mut session, &ctx, 1).await.unwrap_err();
        assert!(matches!(err, SessionError::NoBackendHost(_)));
        assert!(!session.has_backend());
    }

    #[tokio::test]
    async fn test_stream_tagged_and_pumped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let services = Arc::new(ServicePool::new());
        services
            .add_service("/backends/game-10000/game1", listener.local_addr().unwrap())
            .await;
        let ctx = context(services, Some("game1"));

        let (mut session, mut mailbox) = test_session();
        open(&mut session, &ctx, 77).await.unwrap();
        assert_eq!(session.backend_host_id.as_deref(), Some("game1"));

        let (stream, _) = listener.accept().await.unwrap();
        let (metadata, mut host_tx, mut host_rx) = relay::accept_stream(stream).await.unwrap();
        assert_eq!(metadata.player_id().unwrap(), 77);

        forward(&mut session, vec![3, 233, 0, 0, 0, 5]).await.unwrap();
        assert_eq!(
            host_rx.recv().await.unwrap(),
            Some(RelayFrame::Message(vec![3, 233, 0, 0, 0, 5]))
        );

        // pings are answered by the host but never reach the mailbox
        host_tx.send(&RelayFrame::Ping(ping_payload())).await.unwrap();
        host_tx
            .send(&RelayFrame::Message(vec![3, 233, 1]))
            .await
            .unwrap();
        assert_eq!(
            mailbox.recv().await,
            Some(RelayFrame::Message(vec![3, 233, 1]))
        );

        // stream end turns into a kick behind queued frames
        drop(host_tx);
        drop(host_rx);
        assert_eq!(mailbox.recv().await, Some(RelayFrame::Kick));
    }
}

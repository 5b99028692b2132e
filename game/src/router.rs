//! Per-stream control loop of a game host
//!
//! One router runs per relay stream. It registers the player's mailbox,
//! then multiplexes two sources onto the stream's send half: frames from the
//! gateway, dispatched to the game handlers, and frames other components
//! pushed through the registry. Pings are echoed without dispatch.

use crate::handlers::{self, GameMessage};
use crate::registry::Registry;
use crate::session::GameSession;
use log::{debug, info};
use shared::relay::{RelayError, RelayReceiver, RelaySender};
use shared::{decode, DecodeError, RelayFrame, StreamMetadata};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("relay stream: {0}")]
    Relay(#[from] RelayError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("no handler registered for message {0}")]
    UnknownMessage(i16),
}

/// Serves one relay stream until either side ends it.
///
/// A stream without a usable player id is rejected before anything is
/// registered. The registry entry is removed on every exit path.
pub async fn serve_stream<R, W>(
    metadata: StreamMetadata,
    mut sender: RelaySender<W>,
    receiver: RelayReceiver<R>,
    registry: &Registry,
    mailbox_size: usize,
) -> Result<(), RouterError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let player_id = metadata.player_id()?;
    let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_size.max(1));
    let _registration = registry.register(player_id, mailbox_tx);
    info!("relay stream opened for player {}", player_id);

    // Reads are not cancel safe, so they run in their own task and the loop
    // selects on a queue instead.
    let (inbound_tx, inbound_rx) = mpsc::channel(1);
    let reader = tokio::spawn(async move {
        let mut receiver = receiver;
        loop {
            let result = receiver.recv().await;
            let more = matches!(result, Ok(Some(_)));
            if inbound_tx.send(result).await.is_err() || !more {
                break;
            }
        }
    });

    let mut session = GameSession::new(player_id);
    let result = route(&mut session, &mut sender, inbound_rx, mailbox_rx).await;
    reader.abort();
    if let Err(e) = sender.close_send().await {
        debug!("closing stream of player {} failed: {}", player_id, e);
    }
    info!(
        "relay stream of player {} ended after {} messages",
        player_id, session.handled
    );
    result
}

async fn route<W: AsyncWrite + Unpin>(
    session: &mut GameSession,
    sender: &mut RelaySender<W>,
    mut inbound: mpsc::Receiver<Result<Option<RelayFrame>, RelayError>>,
    mut mailbox: mpsc::Receiver<RelayFrame>,
) -> Result<(), RouterError> {
    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(Ok(Some(RelayFrame::Message(payload)))) => {
                    let (id, mut reader) = decode(&payload)?;
                    let message =
                        GameMessage::from_id(id).ok_or(RouterError::UnknownMessage(id))?;
                    session.handled += 1;
                    if let Some(reply) = handlers::handle(message, session, &mut reader)? {
                        sender.send(&RelayFrame::Message(reply)).await?;
                    }
                    if session.is_kicked() {
                        sender.send(&RelayFrame::Kick).await?;
                        return Ok(());
                    }
                }
                Some(Ok(Some(RelayFrame::Ping(payload)))) => {
                    sender.send(&RelayFrame::Ping(payload)).await?;
                }
                Some(Ok(Some(RelayFrame::Kick))) => {
                    debug!("gateway sent kick for player {}", session.player_id);
                    return Ok(());
                }
                Some(Ok(None)) | None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
            },
            // disabled once a newer registration replaced this mailbox
            Some(frame) = mailbox.recv() => {
                let kick = frame == RelayFrame::Kick;
                sender.send(&frame).await?;
                if kick {
                    return Ok(());
                }
            },
        }
    }
}

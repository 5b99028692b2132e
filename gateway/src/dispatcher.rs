//! Inbound frame validation and routing
//!
//! Every client frame goes through the same steps, and any failure ends the
//! session with the frame discarded:
//!
//! 1. decrypt, once encryption is active
//! 2. read the 32-bit sequence and check it against the session counter
//! 3. read the message id
//! 4. relay ids go to the game host untouched, local ids to their handler

use crate::bridge;
use crate::context::GatewayContext;
use crate::error::SessionError;
use crate::handlers;
use crate::session::{Session, SessionState};
use log::debug;
use shared::proto::{message_name, GET_SEED_REQ, HEART_BEAT_REQ, USER_LOGIN_REQ};
use shared::{Reader, RELAY_MESSAGE_BEGIN};
use tokio::time::Instant;

/// Messages the gateway answers itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMessage {
    HeartBeat,
    GetSeed,
    UserLogin,
}

impl LocalMessage {
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            HEART_BEAT_REQ => Some(LocalMessage::HeartBeat),
            GET_SEED_REQ => Some(LocalMessage::GetSeed),
            USER_LOGIN_REQ => Some(LocalMessage::UserLogin),
            _ => None,
        }
    }
}

/// Runs one client payload through validation and routing.
///
/// Returns the reply to queue, if the handler produced one. Relayed frames
/// never produce a reply here; the game host answers through the mailbox.
pub async fn dispatch(
    session: &mut Session,
    ctx: &GatewayContext,
    mut payload: Vec<u8>,
) -> Result<Option<Vec<u8>>, SessionError> {
    let started = Instant::now();

    session.open_inbound(&mut payload);
    let mut reader = Reader::new(&payload);
    let sequence = reader.read_u32()?;
    session.accept_sequence(sequence)?;
    let message_id = reader.read_i16()?;

    if !session.has_exchanged_keys()
        && !ctx.config.allow_plaintext
        && message_id != GET_SEED_REQ
    {
        return Err(SessionError::PlaintextRejected(message_id));
    }

    if message_id >= RELAY_MESSAGE_BEGIN {
        // forward id and body verbatim, the gateway does not parse them
        bridge::forward(session, payload[4..].to_vec()).await?;
        debug!(
            "relayed {} for player {} in {:?}",
            message_id,
            session.player_label(),
            started.elapsed()
        );
        return Ok(None);
    }

    let message =
        LocalMessage::from_id(message_id).ok_or(SessionError::UnknownMessage(message_id))?;
    if message != LocalMessage::GetSeed {
        // plaintext session: the first normal frame ends the handshake phase
        session.transition(SessionState::Active);
    }

    let reply = match message {
        LocalMessage::HeartBeat => handlers::heart_beat(&mut reader)?,
        LocalMessage::GetSeed => handlers::get_seed(session, &mut reader)?,
        LocalMessage::UserLogin => handlers::user_login(session, ctx, &mut reader).await?,
    };

    debug!(
        "{} from {} (player {}) handled in {:?}",
        message_name(message_id),
        session.addr,
        session.player_label(),
        started.elapsed()
    );
    Ok(reply)
}
